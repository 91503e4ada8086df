pub mod catalog;
pub mod chart;
pub mod frame;
pub mod params;
pub mod run;

pub use catalog::*;
pub use chart::*;
pub use frame::*;
pub use params::*;
pub use run::*;
