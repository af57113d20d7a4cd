mod retry_tests;
