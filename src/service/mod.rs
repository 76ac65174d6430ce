pub mod qa;
pub mod sql_agent;
pub mod uploads;
pub mod workspace_actor;
