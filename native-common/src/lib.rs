pub mod content;
pub mod message;
pub mod metrics;
pub mod routing;
