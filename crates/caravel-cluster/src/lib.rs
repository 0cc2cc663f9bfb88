//! Process-based transports for the apply engine: `kubectl` as the
//! control-plane client and `docker` as the image artifact builder.

mod docker;
mod kubectl;

pub use docker::DockerBuilder;
pub use kubectl::{KubectlClient, TransportSetupError};
