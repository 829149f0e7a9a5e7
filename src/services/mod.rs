pub mod cleanup;
pub mod ensemble;
pub mod forecast;
pub mod geocode;
pub mod normalize;
pub mod open_meteo;
pub mod risk;
pub mod risk_grid;
pub mod risk_map;
pub mod scheduler;
pub mod sites;
