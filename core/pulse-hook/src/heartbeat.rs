//! `pulse heartbeat`: build the candidate from flags and run one delivery.

use chrono::{DateTime, Utc};
use clap::Args;
use pulse_core::{
    exit_code, Delivery, ProjectOverrides, ProjectResolver, StorageConfig,
};
use pulse_protocol::{heartbeat_time, Category, EntityType, ErrorInfo, Heartbeat};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::{ApiArgs, Pipeline};

/// Fields owned by the pipeline; enrichment may not shadow them.
const RESERVED_FIELDS: &[&str] = &[
    "entity",
    "type",
    "time",
    "project",
    "branch",
    "project_folder",
    "language",
    "category",
    "is_write",
];

#[derive(Error, Debug)]
pub enum HeartbeatError {
    #[error("invalid --enrichment: {0}")]
    Enrichment(String),

    #[error("invalid heartbeat: {0}")]
    Invalid(#[from] ErrorInfo),
}

#[derive(Args, Debug, Clone)]
pub struct HeartbeatArgs {
    /// File path, app name or domain the activity happened in
    #[arg(long)]
    pub entity: String,

    /// Unix time in fractional seconds (defaults to now)
    #[arg(long)]
    pub time: Option<f64>,

    /// Kind of entity: file, app or domain
    #[arg(long = "entity-type", default_value = "file")]
    pub entity_type: EntityType,

    /// Project name, skipping detection
    #[arg(long)]
    pub project: Option<String>,

    /// Project name used when nothing else is detected
    #[arg(long = "alternate-project")]
    pub alternate_project: Option<String>,

    #[arg(long)]
    pub branch: Option<String>,

    /// Project root directory, skipping detection of the folder
    #[arg(long = "project-folder")]
    pub project_folder: Option<String>,

    #[arg(long)]
    pub language: Option<String>,

    /// Activity category (coding, building, debugging, ...)
    #[arg(long)]
    pub category: Option<Category>,

    /// The entity was saved
    #[arg(long)]
    pub write: bool,

    /// JSON object of extra fields (lines, lineno, cursorpos, ...)
    #[arg(long)]
    pub enrichment: Option<String>,

    #[command(flatten)]
    pub api: ApiArgs,
}

pub fn run(args: HeartbeatArgs, storage: &StorageConfig) -> i32 {
    let now = Utc::now();
    let candidate = match build_heartbeat(&args, now) {
        Ok(candidate) => candidate,
        Err(err) => {
            tracing::error!(error = %err, entity = %args.entity, "Heartbeat rejected");
            eprintln!("{err}");
            return exit_code::ERR_GENERIC;
        }
    };

    let pipeline = match Pipeline::open(storage, &args.api) {
        Ok(pipeline) => pipeline,
        Err(code) => return code,
    };
    let resolver = ProjectResolver::new(ProjectOverrides {
        project: args.project.clone(),
        branch: args.branch.clone(),
        alternate_project: args.alternate_project.clone(),
    });

    let report = Delivery::new(&pipeline.client, &pipeline.queue, &pipeline.backoff)
        .with_resolver(&resolver)
        .process(candidate, now);

    if let Some(message) = &report.message {
        eprintln!("{message}");
    }
    report.exit_code
}

/// Turns flags into a validated heartbeat. Project and branch are copied as
/// given; detection fills whatever is still missing later.
pub fn build_heartbeat(args: &HeartbeatArgs, now: DateTime<Utc>) -> Result<Heartbeat, HeartbeatError> {
    let mut heartbeat = Heartbeat::new(
        args.entity.trim(),
        args.time.unwrap_or_else(|| heartbeat_time(now)),
    );
    heartbeat.entity_type = args.entity_type;
    heartbeat.project = non_empty(&args.project);
    heartbeat.branch = non_empty(&args.branch);
    heartbeat.project_folder = non_empty(&args.project_folder);
    heartbeat.language = non_empty(&args.language);
    heartbeat.category = args.category.unwrap_or_default();
    heartbeat.is_write = args.write;

    if let Some(raw) = &args.enrichment {
        heartbeat.enrichment = parse_enrichment(raw)?;
    }

    heartbeat.validate()?;
    Ok(heartbeat)
}

fn parse_enrichment(raw: &str) -> Result<Map<String, Value>, HeartbeatError> {
    let value: Value =
        serde_json::from_str(raw).map_err(|err| HeartbeatError::Enrichment(err.to_string()))?;
    let Value::Object(mut fields) = value else {
        return Err(HeartbeatError::Enrichment("expected a JSON object".to_string()));
    };

    for reserved in RESERVED_FIELDS {
        if fields.remove(*reserved).is_some() {
            tracing::warn!(field = reserved, "Ignoring reserved field in enrichment");
        }
    }
    Ok(fields)
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Cli, Commands};
    use chrono::TimeZone;
    use clap::Parser;

    fn parse(extra: &[&str]) -> HeartbeatArgs {
        let mut argv = vec!["pulse", "heartbeat"];
        argv.extend_from_slice(extra);
        match Cli::try_parse_from(argv).unwrap().command {
            Commands::Heartbeat(args) => args,
            _ => panic!("expected heartbeat subcommand"),
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.timestamp_opt(1_769_774_400, 500_000_000).unwrap()
    }

    #[test]
    fn test_flags_map_onto_heartbeat() {
        let args = parse(&[
            "--entity",
            "/repo/src/lib.rs",
            "--time",
            "1769774000.25",
            "--category",
            "code-reviewing",
            "--language",
            "Rust",
            "--branch",
            "main",
            "--project-folder",
            "/repo",
            "--write",
            "--plugin",
            "vim/9.1 vim-pulse/1.0",
        ]);
        let hb = build_heartbeat(&args, now()).unwrap();

        assert_eq!(hb.entity, "/repo/src/lib.rs");
        assert_eq!(hb.time, 1_769_774_000.25);
        assert_eq!(hb.category, Category::CodeReviewing);
        assert_eq!(hb.language.as_deref(), Some("Rust"));
        assert_eq!(hb.branch.as_deref(), Some("main"));
        assert_eq!(hb.project, None);
        assert_eq!(hb.project_folder.as_deref(), Some("/repo"));
        assert!(hb.is_write);
        assert_eq!(args.api.plugin.as_deref(), Some("vim/9.1 vim-pulse/1.0"));
    }

    #[test]
    fn test_time_defaults_to_now() {
        let hb = build_heartbeat(&parse(&["--entity", "/a.rs"]), now()).unwrap();
        assert_eq!(hb.time, 1_769_774_400.5);
        assert_eq!(hb.entity_type, EntityType::File);
        assert_eq!(hb.category, Category::Coding);
    }

    #[test]
    fn test_enrichment_is_flattened_without_reserved_fields() {
        let args = parse(&[
            "--entity",
            "/a.rs",
            "--enrichment",
            r#"{"lines": 120, "lineno": 7, "entity": "/spoofed"}"#,
        ]);
        let hb = build_heartbeat(&args, now()).unwrap();

        assert_eq!(hb.entity, "/a.rs");
        assert_eq!(hb.enrichment.get("lines"), Some(&Value::from(120)));
        assert!(!hb.enrichment.contains_key("entity"));

        let wire = serde_json::to_value(&hb).unwrap();
        assert_eq!(wire["lineno"], 7);
        assert_eq!(wire["entity"], "/a.rs");
    }

    #[test]
    fn test_enrichment_must_be_an_object() {
        let args = parse(&["--entity", "/a.rs", "--enrichment", "[1, 2]"]);
        assert!(matches!(
            build_heartbeat(&args, now()),
            Err(HeartbeatError::Enrichment(_))
        ));
    }

    #[test]
    fn test_blank_entity_is_rejected() {
        let args = parse(&["--entity", "   "]);
        assert!(matches!(
            build_heartbeat(&args, now()),
            Err(HeartbeatError::Invalid(_))
        ));
    }

    #[test]
    fn test_unknown_entity_type_fails_to_parse() {
        let result = Cli::try_parse_from(["pulse", "heartbeat", "--entity", "x", "--entity-type", "folder"]);
        assert!(result.is_err());

        let args = parse(&["--entity", "github.com", "--entity-type", "domain"]);
        assert_eq!(args.entity_type, EntityType::Domain);
    }
}
