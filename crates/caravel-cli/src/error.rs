use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    ArgumentParse(#[from] clap::Error),
    #[error("invalid --image value \"{value}\" (expected SERVICE=REFERENCE)")]
    InvalidImagePin { value: String },
    #[error(transparent)]
    Validation(#[from] caravel_domain::DomainValidationError),
    #[error(transparent)]
    Topology(#[from] caravel_engine::TopologyError),
    #[error(transparent)]
    Artifact(#[from] caravel_engine::ArtifactError),
    #[error(transparent)]
    Transport(#[from] caravel_cluster::TransportSetupError),
    #[error(transparent)]
    Report(#[from] caravel_report::ReportError),
}
