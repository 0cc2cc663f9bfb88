// Target-specific transitive dependency split (mio/crossterm stack) is accepted for now.
#![allow(clippy::multiple_crate_versions)]

use std::ffi::OsString;
use std::io::IsTerminal;
use std::path::PathBuf;

use caravel_cluster::{DockerBuilder, KubectlClient};
use caravel_domain::ImageReference;
use caravel_engine::{CancelToken, ImageResolution, RunOptions, assemble_demo, build_plan, run};
use caravel_report::{ColorChoice, OutputFormat, RenderOptions, render_plan, render_run};
use clap::error::ErrorKind;
use clap::{Args, Parser, Subcommand, ValueEnum};
use minus::{ExitStrategy, Pager, page_all};

mod error;

pub use error::CliError;

#[derive(Debug, Parser)]
#[command(name = "caravel", about = "Dependency-ordered manifest apply engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    Apply {
        /// Manifest root directory.
        root: PathBuf,
        #[command(flatten)]
        render: RenderFlags,
        #[arg(long, value_enum, default_value_t = FormatArg::Text)]
        format: FormatArg,
        /// Apply the plan against the cluster instead of printing it.
        #[arg(long)]
        execute: bool,
        /// Pin a service image as SERVICE=REFERENCE. Repeatable.
        #[arg(long = "image", value_name = "SERVICE=REFERENCE")]
        images: Vec<String>,
        /// Build unpinned service images from <build-root>/<service>.
        #[arg(long)]
        build_root: Option<PathBuf>,
        /// Cluster context passed through to the transport.
        #[arg(long)]
        kube_context: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum FormatArg {
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ColorArg {
    Auto,
    Always,
    Never,
}

#[derive(Debug, Clone, Args)]
struct RenderFlags {
    #[arg(long, value_enum, default_value_t = ColorArg::Auto)]
    color: ColorArg,
    #[arg(long)]
    verbose: bool,
}

impl RenderFlags {
    fn render_options(&self, target: &str) -> RenderOptions {
        RenderOptions {
            color: self.color.into(),
            verbose: self.verbose,
            target: Some(target.to_string()),
        }
    }
}

impl From<FormatArg> for OutputFormat {
    fn from(value: FormatArg) -> Self {
        match value {
            FormatArg::Text => Self::Text,
            FormatArg::Json => Self::Json,
        }
    }
}

impl From<ColorArg> for ColorChoice {
    fn from(value: ColorArg) -> Self {
        match value {
            ColorArg::Auto => Self::Auto,
            ColorArg::Always => Self::Always,
            ColorArg::Never => Self::Never,
        }
    }
}

/// Run the CLI using process arguments.
///
/// # Errors
///
/// Returns an error when argument parsing fails (excluding help/version) or
/// command execution fails.
pub fn run_cli() -> std::result::Result<i32, CliError> {
    run_from(std::env::args_os())
}

fn run_from<I, T>(args: I) -> std::result::Result<i32, CliError>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = match Cli::try_parse_from(args) {
        Ok(parsed) => parsed,
        Err(error) => match error.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
                print!("{error}");
                return Ok(0);
            }
            _ => return Err(error.into()),
        },
    };

    match cli.command {
        Commands::Apply {
            root,
            render,
            format,
            execute,
            images,
            build_root,
            kube_context,
        } => {
            let pins = parse_image_pins(&images)?;
            let render_options = render.render_options(&root.display().to_string());
            let output_format: OutputFormat = format.into();

            let mut resolution = ImageResolution::new();
            for (service, reference) in pins {
                resolution = resolution.pin(&service, reference);
            }
            let docker;
            if let Some(build_root) = build_root {
                docker = DockerBuilder::discover()?;
                resolution = resolution.with_builder(build_root, &docker);
            }
            if execute {
                resolution = resolution.require_resolved();
            }

            let graph = assemble_demo(&root, &resolution)?;
            let plan = build_plan(&graph);

            if !execute {
                let has_errors = plan.has_errors();
                let rendered = render_plan(&plan, output_format, &render_options)?;
                emit_output(&rendered, output_format);
                if !has_errors && output_format == OutputFormat::Text {
                    eprintln!("hint: re-run with --execute to apply changes");
                }
                return Ok(i32::from(has_errors));
            }

            let client = KubectlClient::discover(kube_context)?;
            let report = run(&graph, &client, RunOptions::default(), &CancelToken::new());
            let has_failures = report.has_failures();
            let rendered = render_run(&report, output_format, &render_options)?;
            emit_output(&rendered, output_format);
            Ok(i32::from(has_failures))
        }
    }
}

fn parse_image_pins(values: &[String]) -> Result<Vec<(String, ImageReference)>, CliError> {
    values
        .iter()
        .map(|value| {
            let (service, reference) =
                value
                    .split_once('=')
                    .ok_or_else(|| CliError::InvalidImagePin {
                        value: value.clone(),
                    })?;
            if service.trim().is_empty() {
                return Err(CliError::InvalidImagePin {
                    value: value.clone(),
                });
            }
            Ok((service.to_string(), ImageReference::try_from(reference)?))
        })
        .collect()
}

fn emit_output(rendered: &str, format: OutputFormat) {
    if format == OutputFormat::Text && should_use_pager() && page_output(rendered).is_ok() {
        return;
    }

    if rendered.ends_with('\n') {
        print!("{rendered}");
    } else {
        println!("{rendered}");
    }
}

fn should_use_pager() -> bool {
    std::io::stdout().is_terminal() && std::env::var_os("NO_PAGER").is_none()
}

fn page_output(rendered: &str) -> std::result::Result<(), minus::MinusError> {
    let pager = Pager::new();
    pager.set_exit_strategy(ExitStrategy::PagerQuit)?;
    pager.set_text(rendered)?;
    page_all(pager)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used)]

    use super::parse_image_pins;
    use crate::CliError;

    #[test]
    fn image_pins_parse_service_and_reference() {
        let pins = parse_image_pins(&["frontend=registry.local/frontend:v2".to_string()])
            .expect("valid pin");
        assert_eq!(pins[0].0, "frontend");
        assert_eq!(pins[0].1.as_str(), "registry.local/frontend:v2");
    }

    #[test]
    fn image_pins_without_separator_are_rejected() {
        let error =
            parse_image_pins(&["frontend".to_string()]).expect_err("missing separator must fail");
        assert!(matches!(error, CliError::InvalidImagePin { .. }));
    }

    #[test]
    fn image_pins_with_blank_service_are_rejected() {
        let error = parse_image_pins(&["=registry.local/frontend:v2".to_string()])
            .expect_err("blank service must fail");
        assert!(matches!(error, CliError::InvalidImagePin { .. }));
    }

    #[test]
    fn image_pins_with_blank_reference_are_rejected() {
        let error =
            parse_image_pins(&["frontend=".to_string()]).expect_err("blank reference must fail");
        assert!(matches!(error, CliError::Validation(_)));
    }
}
