pub mod deadline_sweeper;
pub mod game_service;
pub mod night_resolver;
pub mod notifier;
pub mod phase_service;
pub mod recap;
pub mod role_behavior;
pub mod session_store;
pub mod sqlite_store;
pub mod vote_resolver;
