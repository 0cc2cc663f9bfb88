use std::fmt::Write;
use std::io::{self, IsTerminal};

use caravel_domain::{
    ApplyOutcome, FailureKind, NodeReport, NodeState, NodeSummary, PlanReport, RunReport,
};
use console::Style;

mod error;
mod options;

pub use error::ReportError;
pub use options::{ColorChoice, OutputFormat, RenderOptions};

/// Render a plan report in the requested output format.
///
/// # Errors
///
/// Returns an error if JSON serialization fails.
pub fn render_plan(
    report: &PlanReport,
    format: OutputFormat,
    options: &RenderOptions,
) -> std::result::Result<String, ReportError> {
    match format {
        OutputFormat::Json => serde_json::to_string_pretty(report)
            .map_err(|source| ReportError::JsonSerialize { source }),
        OutputFormat::Text => Ok(render_plan_text(report, options)),
    }
}

/// Render a run report in the requested output format.
///
/// # Errors
///
/// Returns an error if JSON serialization fails.
pub fn render_run(
    report: &RunReport,
    format: OutputFormat,
    options: &RenderOptions,
) -> std::result::Result<String, ReportError> {
    match format {
        OutputFormat::Json => serde_json::to_string_pretty(report)
            .map_err(|source| ReportError::JsonSerialize { source }),
        OutputFormat::Text => Ok(render_run_text(report, options)),
    }
}

// ---------------------------------------------------------------------------
// Plan text
// ---------------------------------------------------------------------------

fn render_plan_text(report: &PlanReport, options: &RenderOptions) -> String {
    let mut output = String::new();
    let style = TextStyle::new(options.color);

    append_header(&mut output, "plan", options.target.as_deref(), &style);

    if report.nodes.is_empty() {
        let _ = writeln!(output, "  Nothing to do.");
        append_warnings_and_errors(&mut output, &plan_warnings(report), &report.errors, &style);
        return output;
    }

    let _ = writeln!(output);
    append_warnings_and_errors(&mut output, &plan_warnings(report), &report.errors, &style);
    for node in &report.nodes {
        append_plan_node_line(&mut output, node, options, &style);
    }

    let _ = writeln!(output);
    let tally = PlanTally::from_nodes(&report.nodes);
    let _ = writeln!(output, "{}", tally.format(&style));

    output
}

fn append_plan_node_line(
    output: &mut String,
    node: &NodeSummary,
    options: &RenderOptions,
    style: &TextStyle,
) {
    let symbol = style.add_symbol("+");
    let label = TextStyle::pad_label(&style.add_label("apply"));
    let mut detail = style.primary_text(node.id.as_str());

    let documents = node.documents.len();
    let noun = if documents == 1 { "document" } else { "documents" };
    let _ = write!(detail, " {}", style.dim(&format!("({documents} {noun})")));

    if !node.depends_on.is_empty() {
        let after = node
            .depends_on
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        let _ = write!(detail, " {}", style.dim(&format!("after {after}")));
    }
    if node.readiness_gate {
        let _ = write!(detail, " {}", style.change_label("[waits for ready]"));
    }

    let _ = writeln!(output, "  {symbol} {label}{detail}");

    for binding in &node.images {
        let line = format!("image:    {} <- {}", binding.container, binding.reference);
        if binding.reference.is_placeholder() {
            let _ = writeln!(output, "    {}", style.warn_prefix(&line));
        } else {
            let _ = writeln!(output, "    {}", style.dim(&line));
        }
    }

    if options.verbose {
        for identity in &node.documents {
            let _ = writeln!(output, "    {}", style.dim(&identity.to_string()));
        }
        let short = &node.content_hash[..node.content_hash.len().min(12)];
        let _ = writeln!(
            output,
            "    {}",
            style.dim(&format!("content:  sha256:{short}"))
        );
    }
}

fn plan_warnings(report: &PlanReport) -> Vec<String> {
    if report.has_pending_images() {
        vec![
            "some image references are pending build; supply --image or --build-root before --execute"
                .to_string(),
        ]
    } else {
        Vec::new()
    }
}

// ---------------------------------------------------------------------------
// Run text
// ---------------------------------------------------------------------------

fn render_run_text(report: &RunReport, options: &RenderOptions) -> String {
    let mut output = String::new();
    let style = TextStyle::new(options.color);

    append_header(&mut output, "apply", options.target.as_deref(), &style);

    if report.nodes.is_empty() {
        let _ = writeln!(output, "  Nothing to do.");
        append_warnings_and_errors(&mut output, &[], &report.errors, &style);
        return output;
    }

    let (active, unchanged): (Vec<&NodeReport>, Vec<&NodeReport>) = report
        .nodes
        .iter()
        .partition(|node| !is_unchanged(node) || options.verbose);

    let _ = writeln!(output);
    append_warnings_and_errors(&mut output, &[], &report.errors, &style);
    for node in &active {
        append_run_node_line(&mut output, node, options, &style);
    }

    if !unchanged.is_empty() {
        let _ = writeln!(output);
        let _ = writeln!(
            output,
            "  {}",
            style.dim(&format!("{} unchanged", unchanged.len()))
        );
    }

    let _ = writeln!(output);
    let tally = RunTally::from_nodes(&report.nodes);
    let _ = writeln!(output, "{}", tally.format(&style));

    output
}

fn is_unchanged(node: &NodeReport) -> bool {
    node.state == NodeState::Applied
        && node
            .documents
            .iter()
            .all(|document| document.outcome == ApplyOutcome::Unchanged)
}

fn append_run_node_line(
    output: &mut String,
    node: &NodeReport,
    options: &RenderOptions,
    style: &TextStyle,
) {
    let (symbol, label) = run_symbol_and_label(node, style);
    let _ = writeln!(
        output,
        "  {symbol} {label}{}",
        style.primary_text(node.id.as_str())
    );

    if let Some(failure) = &node.failure {
        let _ = writeln!(
            output,
            "                     {}",
            style.error_detail(&failure.message)
        );
    }
    if let Some(blocked_by) = &node.blocked_by {
        let _ = writeln!(
            output,
            "                     {}",
            style.dim(&format!("waiting on {blocked_by}"))
        );
    }

    if options.verbose {
        for document in &node.documents {
            let attempts = if document.attempts > 1 {
                format!(" ({} attempts)", document.attempts)
            } else {
                String::new()
            };
            let _ = writeln!(
                output,
                "    {}",
                style.dim(&format!(
                    "{} {}{attempts}",
                    document.identity,
                    outcome_verb(document.outcome)
                ))
            );
        }
    }
}

fn run_symbol_and_label(node: &NodeReport, style: &TextStyle) -> (String, String) {
    match node.state {
        NodeState::Failed => {
            let label = node.failure.as_ref().map_or("failed", |failure| {
                match failure.kind {
                    FailureKind::Fatal => "failed",
                    FailureKind::RetryExhausted => "failed (retries)",
                    FailureKind::ReadinessTimeout => "not ready",
                    FailureKind::Cancelled => "cancelled",
                }
            });
            (
                style.error_op_symbol("!"),
                TextStyle::pad_label(&style.error_op_label(label)),
            )
        }
        NodeState::Pending | NodeState::Applying => {
            let label = if node.blocked_by.is_some() {
                "blocked"
            } else {
                "pending"
            };
            (
                style.noop_symbol("."),
                TextStyle::pad_label(&style.noop_label(label)),
            )
        }
        NodeState::Applied => {
            if is_unchanged(node) {
                (
                    style.noop_symbol("="),
                    TextStyle::pad_label(&style.noop_label("unchanged")),
                )
            } else if node
                .documents
                .iter()
                .any(|document| document.outcome == ApplyOutcome::Configured)
            {
                (
                    style.change_symbol("~"),
                    TextStyle::pad_label(&style.change_label("configured")),
                )
            } else {
                (
                    style.add_symbol("+"),
                    TextStyle::pad_label(&style.add_label("created")),
                )
            }
        }
    }
}

const fn outcome_verb(outcome: ApplyOutcome) -> &'static str {
    match outcome {
        ApplyOutcome::Created => "created",
        ApplyOutcome::Configured => "configured",
        ApplyOutcome::Unchanged => "unchanged",
    }
}

// ---------------------------------------------------------------------------
// Header, warnings and errors
// ---------------------------------------------------------------------------

fn append_header(output: &mut String, command: &str, target: Option<&str>, style: &TextStyle) {
    let _ = write!(output, "{}", style.header_command(command));
    if let Some(target) = target {
        let _ = write!(output, " {}", style.header_target(target));
    }
    let _ = writeln!(output);
}

fn append_warnings_and_errors(
    output: &mut String,
    warnings: &[String],
    errors: &[String],
    style: &TextStyle,
) {
    if warnings.is_empty() && errors.is_empty() {
        return;
    }
    for warning in warnings {
        let _ = writeln!(output, "  {} {warning}", style.warn_prefix("warn:"));
    }
    for error in errors {
        let _ = writeln!(output, "  {} {error}", style.error_prefix("error:"));
    }
    let _ = writeln!(output);
}

// ---------------------------------------------------------------------------
// Tallies
// ---------------------------------------------------------------------------

struct PlanTally {
    nodes: usize,
    documents: usize,
    gated: usize,
    pending_images: usize,
}

impl PlanTally {
    fn from_nodes(nodes: &[NodeSummary]) -> Self {
        Self {
            nodes: nodes.len(),
            documents: nodes.iter().map(|node| node.documents.len()).sum(),
            gated: nodes.iter().filter(|node| node.readiness_gate).count(),
            pending_images: nodes
                .iter()
                .flat_map(|node| &node.images)
                .filter(|binding| binding.reference.is_placeholder())
                .count(),
        }
    }

    fn format(&self, style: &TextStyle) -> String {
        let mut parts = vec![style.add_label(&format!(
            "{} node(s), {} document(s) to apply",
            self.nodes, self.documents
        ))];
        if self.gated > 0 {
            parts.push(style.change_label(&format!("{} readiness gate(s)", self.gated)));
        }
        if self.pending_images > 0 {
            parts.push(style.warn_prefix(&format!("{} image(s) pending build", self.pending_images)));
        }
        format!("{} {}", style.tally_label("Plan:"), parts.join(", "))
    }
}

struct RunTally {
    applied: usize,
    failed: usize,
    blocked: usize,
    unchanged: usize,
}

impl RunTally {
    fn from_nodes(nodes: &[NodeReport]) -> Self {
        let mut tally = Self {
            applied: 0,
            failed: 0,
            blocked: 0,
            unchanged: 0,
        };
        for node in nodes {
            match node.state {
                NodeState::Applied if is_unchanged(node) => tally.unchanged += 1,
                NodeState::Applied => tally.applied += 1,
                NodeState::Failed => tally.failed += 1,
                NodeState::Pending | NodeState::Applying => tally.blocked += 1,
            }
        }
        tally
    }

    fn format(&self, style: &TextStyle) -> String {
        let mut parts = Vec::new();
        if self.applied > 0 {
            parts.push(style.add_label(&format!("{} applied", self.applied)));
        }
        if self.failed > 0 {
            parts.push(style.error_op_label(&format!("{} failed", self.failed)));
        }
        if self.blocked > 0 {
            parts.push(style.noop_label(&format!("{} blocked", self.blocked)));
        }
        if self.unchanged > 0 {
            parts.push(style.dim(&format!("{} unchanged", self.unchanged)));
        }
        if parts.is_empty() {
            format!("{} nothing to do", style.tally_label("Applied:"))
        } else {
            format!("{} {}", style.tally_label("Applied:"), parts.join(", "))
        }
    }
}

// ---------------------------------------------------------------------------
// TextStyle
// ---------------------------------------------------------------------------

const LABEL_WIDTH: usize = 16;

#[derive(Debug, Clone)]
struct TextStyle {
    color_enabled: bool,
    // Symbols
    add_sym_style: Style,
    change_sym_style: Style,
    error_sym_style: Style,
    noop_sym_style: Style,
    // Labels
    add_label_style: Style,
    change_label_style: Style,
    error_label_style: Style,
    noop_label_style: Style,
    // Content
    primary_style: Style,
    dim_style: Style,
    error_detail_style: Style,
    // Header
    header_cmd_style: Style,
    header_target_style: Style,
    // Prefixes
    warn_prefix_style: Style,
    error_prefix_style: Style,
    // Tally
    tally_label_style: Style,
}

impl TextStyle {
    fn new(choice: ColorChoice) -> Self {
        let enabled = should_color(choice);
        Self {
            color_enabled: enabled,
            add_sym_style: Style::new().green().bold(),
            change_sym_style: Style::new().cyan().bold(),
            error_sym_style: Style::new().red().bold(),
            noop_sym_style: Style::new().dim(),
            add_label_style: Style::new().green(),
            change_label_style: Style::new().cyan(),
            error_label_style: Style::new().red(),
            noop_label_style: Style::new().dim(),
            primary_style: Style::new().white(),
            dim_style: Style::new().dim(),
            error_detail_style: Style::new().red(),
            header_cmd_style: Style::new().white().bold(),
            header_target_style: Style::new().dim(),
            warn_prefix_style: Style::new().yellow().bold(),
            error_prefix_style: Style::new().red().bold(),
            tally_label_style: Style::new().white().bold(),
        }
    }

    fn paint<T: std::fmt::Display>(&self, style: &Style, text: T) -> String {
        if self.color_enabled {
            style.apply_to(text).to_string()
        } else {
            text.to_string()
        }
    }

    fn pad_label(painted: &str) -> String {
        let visible_len = console::measure_text_width(painted);
        if visible_len < LABEL_WIDTH {
            format!("{painted}{}", " ".repeat(LABEL_WIDTH - visible_len))
        } else {
            format!("{painted} ")
        }
    }

    // Symbols
    fn add_symbol(&self, s: &str) -> String {
        self.paint(&self.add_sym_style, s)
    }
    fn change_symbol(&self, s: &str) -> String {
        self.paint(&self.change_sym_style, s)
    }
    fn error_op_symbol(&self, s: &str) -> String {
        self.paint(&self.error_sym_style, s)
    }
    fn noop_symbol(&self, s: &str) -> String {
        self.paint(&self.noop_sym_style, s)
    }

    // Labels
    fn add_label(&self, s: &str) -> String {
        self.paint(&self.add_label_style, s)
    }
    fn change_label(&self, s: &str) -> String {
        self.paint(&self.change_label_style, s)
    }
    fn error_op_label(&self, s: &str) -> String {
        self.paint(&self.error_label_style, s)
    }
    fn noop_label(&self, s: &str) -> String {
        self.paint(&self.noop_label_style, s)
    }

    // Content
    fn primary_text(&self, s: &str) -> String {
        self.paint(&self.primary_style, s)
    }
    fn dim(&self, s: &str) -> String {
        self.paint(&self.dim_style, s)
    }
    fn error_detail(&self, s: &str) -> String {
        self.paint(&self.error_detail_style, s)
    }

    // Header
    fn header_command(&self, s: &str) -> String {
        self.paint(&self.header_cmd_style, s)
    }
    fn header_target(&self, s: &str) -> String {
        self.paint(&self.header_target_style, s)
    }

    // Prefixes
    fn warn_prefix(&self, s: &str) -> String {
        self.paint(&self.warn_prefix_style, s)
    }
    fn error_prefix(&self, s: &str) -> String {
        self.paint(&self.error_prefix_style, s)
    }

    // Tally
    fn tally_label(&self, s: &str) -> String {
        self.paint(&self.tally_label_style, s)
    }
}

fn should_color(choice: ColorChoice) -> bool {
    match choice {
        ColorChoice::Always => true,
        ColorChoice::Never => false,
        ColorChoice::Auto => io::stdout().is_terminal(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
