pub mod driver;
pub mod inspect;
pub mod services;

pub use driver::{ComposeError, DeployOutcome, deploy, find_entrypoint, project_name, stop};
pub use inspect::{
  ContainerHealth, ContainerState, ContainerStatus, DeploymentStatus,
  inspect_deployment, wait_for_healthy,
};
pub use services::{Ingress, ServiceView, list_services};
