use crate::infra::{build_config_source, preview, ApiService, PreviewRequest};
use candidate_scoring::config::{AppConfig, ScoringSettings};
use candidate_scoring::error::AppError;
use candidate_scoring::scoring::{
    ApplicantId, BatchItem, ComponentKey, ComponentStore, ComponentUpdate, CompositeResult,
    CompositeSnapshotStore, FlagRules, InMemoryComponentStore, InMemoryScoringConfig,
    InMemorySnapshotStore, LockWait, RecomputeEngine, ReconciliationService, ScoringConfig,
};
use chrono::Utc;
use clap::Args;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinSet;

#[derive(Args, Debug)]
pub(crate) struct ScoreArgs {
    /// JSON file shaped like `{"applicant_id": 7, "components": {"skills": {"norm": 80}}}`
    #[arg(long)]
    pub(crate) components: PathBuf,
}

/// Score a components file with the configured weights, bands and flag rules.
pub(crate) fn run_score(args: ScoreArgs) -> Result<(), AppError> {
    let config = AppConfig::load()?;
    let raw = fs::read(&args.components)?;
    let request: PreviewRequest = serde_json::from_slice(&raw).map_err(io::Error::from)?;

    let engine = RecomputeEngine::new(
        FlagRules::from_settings(&config.scoring),
        config.scoring.formula_version.clone(),
    );
    let scoring = build_config_source(&config.scoring).load();
    let result = preview(&engine, &scoring, request, Utc::now())?;

    let rendered = serde_json::to_string_pretty(&result).map_err(io::Error::from)?;
    println!("{rendered}");
    Ok(())
}

#[derive(Args, Debug, Default)]
pub(crate) struct DemoArgs {
    /// Applicant id used for the walkthrough
    #[arg(long, default_value_t = 4021)]
    pub(crate) applicant: u64,
    /// Extra flag attached to the medical result, e.g. `risk_cardiac` or `manual_review`
    #[arg(long)]
    pub(crate) medical_flag: Option<String>,
    /// Print full snapshots as JSON instead of one-line summaries
    #[arg(long)]
    pub(crate) json: bool,
}

pub(crate) async fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let settings = ScoringSettings::default();
    let applicant = ApplicantId(args.applicant);
    let service = demo_service(&settings);

    println!("Composite scoring demo for applicant {applicant}");
    println!("Weights: {}", describe_weights(&service.get_config()));

    // Four producers race on the same applicant; the lock serializes their merges.
    let mut producers = JoinSet::new();
    for (key, norm) in [
        ("psymetrics", 80.0),
        ("autoproctor", 100.0),
        ("physical", 88.0),
        ("skills", 71.0),
    ] {
        let service = Arc::clone(&service);
        producers.spawn(async move {
            service
                .update_component_and_recompute(
                    applicant,
                    key,
                    ComponentUpdate::scored(norm),
                    LockWait::Request,
                )
                .await
                .map(|result| (key, result))
        });
    }

    println!("\nConcurrent producers (completion order)");
    while let Some(joined) = producers.join_next().await {
        match joined {
            Ok(Ok((key, result))) => println!("  {key:<12} -> {}", summarize(&result)),
            Ok(Err(err)) => println!("  producer failed: {err}"),
            Err(err) => println!("  producer aborted: {err}"),
        }
    }
    print_snapshot(&service, applicant, args.json)?;

    let mut medical = ComponentUpdate::scored(95.0).with_meta("provider", "clinic-sync");
    if let Some(flag) = args.medical_flag {
        medical = medical.with_flag(flag);
    }
    let outcomes = service
        .apply_batch(vec![BatchItem {
            applicant,
            key: ComponentKey::Medical.as_str().to_string(),
            update: medical,
        }])
        .await;

    println!("\nMedical sync batch");
    for outcome in outcomes {
        match outcome.result {
            Ok(result) => println!("  #{} {} -> {}", outcome.index, outcome.key, summarize(&result)),
            Err(err) => println!("  #{} {} failed: {err}", outcome.index, outcome.key),
        }
    }

    let mut adjusted = service.get_config();
    adjusted.weights.insert(ComponentKey::Psymetrics, 20.0);
    adjusted.weights.insert(ComponentKey::Autoproctor, 40.0);
    service.set_config(adjusted)?;

    println!("\nConfig change: {}", describe_weights(&service.get_config()));
    println!(
        "  stored snapshot before recompute -> {}",
        service
            .get_snapshot(applicant)?
            .map(|result| summarize(&result))
            .unwrap_or_else(|| "none".to_string())
    );
    let result = service.recompute_now(applicant, LockWait::Request).await?;
    println!("  after recompute_now             -> {}", summarize(&result));

    print_snapshot(&service, applicant, args.json)
}

fn demo_service(settings: &ScoringSettings) -> Arc<ApiService> {
    let components: Arc<dyn ComponentStore> = Arc::new(InMemoryComponentStore::default());
    let snapshots: Arc<dyn CompositeSnapshotStore> = Arc::new(InMemorySnapshotStore::default());
    Arc::new(ReconciliationService::new(
        components,
        snapshots,
        Arc::new(InMemoryScoringConfig::default()),
        settings,
    ))
}

fn print_snapshot(
    service: &ApiService,
    applicant: ApplicantId,
    json: bool,
) -> Result<(), AppError> {
    let Some(snapshot) = service.get_snapshot(applicant)? else {
        println!("\nNo snapshot stored for applicant {applicant}");
        return Ok(());
    };

    println!("\nStored snapshot");
    if json {
        let rendered = serde_json::to_string_pretty(&snapshot).map_err(io::Error::from)?;
        println!("{rendered}");
        return Ok(());
    }

    println!("  {}", summarize(&snapshot));
    println!(
        "  present: {}",
        snapshot
            .present
            .iter()
            .map(|key| key.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );
    if !snapshot.missing.is_empty() {
        println!(
            "  missing: {}",
            snapshot
                .missing
                .iter()
                .map(|key| key.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );
    }
    for reason in &snapshot.reasons {
        println!("  reason: {reason}");
    }
    Ok(())
}

fn summarize(result: &CompositeResult) -> String {
    format!(
        "composite {:.2}, grade {}, status {}",
        result.composite, result.grade, result.status_flag
    )
}

fn describe_weights(config: &ScoringConfig) -> String {
    config
        .weights
        .iter()
        .map(|(key, weight)| format!("{key}={weight}"))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_line_names_grade_and_status() {
        let engine = RecomputeEngine::new(FlagRules::default(), "test");
        let request: PreviewRequest =
            serde_json::from_str(r#"{"components": {"skills": {"norm": 90}}}"#)
                .expect("request parses");
        let result = preview(&engine, &ScoringConfig::default(), request, Utc::now())
            .expect("preview computes");

        assert_eq!(
            summarize(&result),
            "composite 90.00, grade A, status provisional"
        );
    }

    #[tokio::test]
    async fn demo_runs_against_in_memory_stores() {
        let args = DemoArgs {
            applicant: 77,
            medical_flag: Some("risk_cardiac".to_string()),
            json: false,
        };
        run_demo(args).await.expect("demo completes");
    }
}
