// Domain layer: core models and ports (interfaces) the matching pipeline talks through.

pub mod model;
pub mod ports;
