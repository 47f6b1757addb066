#[macro_use]
extern crate lazy_static;
#[macro_use]
extern crate prometheus;

pub mod adapter;
pub mod api;
pub mod clock;
pub mod manager;
pub mod metrics;
pub mod model;
pub mod plant;
pub mod session;
pub mod settings;

pub use api::Error;
pub use manager::PlantManager;
