//! Deploy pipeline: upload → sandboxed extraction → detection → provisioning.

pub mod archive;
pub mod detect;
pub mod layout;
mod pipeline;
mod provisioner;

pub use archive::ArchiveFormat;
pub use detect::{Detection, RuntimeKind};
pub use layout::{AppFolder, AppManifest, StorageLayout};
pub use pipeline::{DeployPipeline, DeployRequest, DeployResponse};
pub use provisioner::{ContainerRecipe, ProvisionOutcome, Provisioner};
