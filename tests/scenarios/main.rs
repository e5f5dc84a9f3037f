//! Scenario-based tests for transporter


mod batching;
mod end_to_end;
mod failure_handling;
mod ordering;
mod registration;
