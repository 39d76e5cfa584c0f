pub mod agents;
pub mod events;
pub mod health;
pub mod measurements;
pub mod module_states;
pub mod results;
pub mod workflows;
