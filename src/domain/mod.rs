// Domain layer: models and the command-runner port. No process or filesystem access here.

pub mod model;
pub mod ports;
