pub mod lookup;
pub mod traits;
pub mod types;

pub use lookup::HttpGeoLocator;
pub use traits::GeoLocator;
pub use types::UserLocation;
