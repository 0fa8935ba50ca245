use crate::output::{print_json, print_table};
use anyhow::Context;
use formlink_core::engine::{ActionStatus, LoadReport, MadeAction, MakeReport};
use formlink_core::relationship::Operation;
use formlink_core::store::ActionOutput;
use formlink_core::{ActionOutputStore, FormDefinition, FormEngine, MemoryCrm, Submission};
use serde::Serialize;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Phase {
    /// Locate contacts and relationships to pre-populate from
    Load,
    /// Load, then save the submission
    Make,
}

pub struct RunArgs<'a> {
    pub form: &'a Path,
    pub crm: &'a Path,
    pub submission: Option<&'a Path>,
    pub config: Option<&'a Path>,
    pub phase: Phase,
    pub out_crm: Option<&'a Path>,
}

#[derive(Serialize)]
struct RunReport {
    load: LoadReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    make: Option<MakeReport>,
    /// What the store held when the run finished.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    outputs: Vec<ActionOutput>,
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub fn run(args: RunArgs<'_>, json: bool) -> anyhow::Result<()> {
    let config = super::load_config(args.config)?;
    let form = FormDefinition::load(args.form)
        .with_context(|| format!("failed to load form {}", args.form.display()))?;
    let mut crm = MemoryCrm::load(args.crm)
        .with_context(|| format!("failed to load CRM snapshot {}", args.crm.display()))?;
    let submission = match args.submission {
        Some(p) => Submission::load(p)
            .with_context(|| format!("failed to load submission {}", p.display()))?,
        None => Submission::default(),
    };

    let engine = FormEngine::new(config);
    let mut store = ActionOutputStore::new();

    let load = engine
        .load(&crm, &form, &submission, &mut store)
        .context("load pass failed")?;

    let make = match args.phase {
        Phase::Load => None,
        Phase::Make => Some(
            engine
                .make(&mut crm, &form, &submission, &mut store)
                .context("make pass failed")?,
        ),
    };

    if let (Some(path), Some(_)) = (args.out_crm, &make) {
        crm.save(path)
            .with_context(|| format!("failed to write CRM snapshot {}", path.display()))?;
    }

    let outputs = store.outputs().into_iter().cloned().collect();
    let report = RunReport {
        load,
        make,
        outputs,
    };
    if json {
        return print_json(&report);
    }

    print_load(&report.load);
    if let Some(make) = &report.make {
        println!();
        print_make(make);
    }
    if !store.is_empty() {
        println!();
        print_outputs(&report.outputs);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Human output
// ---------------------------------------------------------------------------

fn status_label(status: ActionStatus) -> &'static str {
    match status {
        ActionStatus::Loaded => "loaded",
        ActionStatus::NotLoaded => "not-loaded",
        ActionStatus::Skipped => "skipped",
        ActionStatus::Saved => "saved",
        ActionStatus::Invalid => "invalid",
        ActionStatus::Failed => "failed",
    }
}

fn id_cell(id: Option<u64>) -> String {
    id.map_or_else(|| "-".to_string(), |id| id.to_string())
}

fn print_load(report: &LoadReport) {
    println!("Load: {}", report.form);
    let rows = report
        .actions
        .iter()
        .map(|a| {
            let matched = a.relationships.iter().filter(|r| r.relationship.is_some()).count();
            vec![
                a.action.clone(),
                status_label(a.status).to_string(),
                id_cell(a.contact_id),
                format!("{matched}/{}", a.relationships.len()),
            ]
        })
        .collect();
    print_table(&["ACTION", "STATUS", "CONTACT", "MATCHED"], rows);
}

fn relationship_cell(made: &MadeAction) -> String {
    let mut parts = Vec::new();
    for outcome in &made.relationships {
        let op = match outcome.instruction.operation {
            Operation::Create => "create",
            Operation::Update => "update",
        };
        let rel = &outcome.instruction.relationship;
        let mut part = format!(
            "{op} {}({}->{})",
            rel.relationship_type_id, rel.contact_id_a, rel.contact_id_b
        );
        if !outcome.succeeded() {
            part.push_str(" FAILED");
        }
        parts.push(part);
    }
    parts.join(", ")
}

fn print_make(report: &MakeReport) {
    println!("Make: {}", report.form);
    let rows = report
        .actions
        .iter()
        .map(|a| {
            vec![
                a.action.clone(),
                a.kind.to_string(),
                status_label(a.status).to_string(),
                id_cell(a.entity_id),
                relationship_cell(a),
            ]
        })
        .collect();
    print_table(&["ACTION", "KIND", "STATUS", "ENTITY", "RELATIONSHIPS"], rows);

    for a in &report.actions {
        for e in &a.errors {
            println!("[error] {}: {e}", a.action);
        }
        for outcome in &a.relationships {
            if let Some(e) = &outcome.error {
                let index = outcome.instruction.spec_index;
                println!("[error] {} relationship #{index}: {e}", a.action);
            }
        }
    }
}

fn print_outputs(outputs: &[ActionOutput]) {
    println!("Outputs:");
    let rows = outputs
        .iter()
        .map(|o| {
            vec![
                o.action.clone(),
                o.kind.to_string(),
                id_cell(o.entity_id),
                o.relationships.len().to_string(),
            ]
        })
        .collect();
    print_table(&["ACTION", "KIND", "ENTITY", "CLAIMED"], rows);
}
