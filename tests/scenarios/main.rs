//! End-to-end pipeline scenarios against scripted tools

mod helpers;

mod best_effort;
mod branching;
mod cancellation;
mod four_stage;
mod quality_gate;
mod readiness;
