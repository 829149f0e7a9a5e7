pub mod forecasts;
pub mod health;
pub mod map;
pub mod scheduler;
pub mod sites;
