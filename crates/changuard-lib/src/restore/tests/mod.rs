mod orchestrator_tests;
mod state_machine_tests;
