//! Document and propagation commands

use crate::error::{Error, Result};
use crate::library::{MaterialLibrary, ReconcileReport};
use crate::meta::{DocumentRecord, MaterialUsage};
use crate::progress::start_progress_bar;
use crate::propagate::{PropagationReport, RefreshReport};
use serde::{Deserialize, Serialize};
use tracing::info;

/// A stored document with the materials it embeds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentDetail {
    pub document: DocumentRecord,
    pub usages: Vec<MaterialUsage>,
}

/// Store a document and sync the usage ledger with its markers
pub async fn cmd_put_document(
    lib: &MaterialLibrary,
    item_type: &str,
    item_id: i64,
    content: &str,
) -> Result<ReconcileReport> {
    info!(item_type, item_id, "Recording document");
    lib.record_document(item_type, item_id, content).await
}

pub async fn cmd_show_document(
    lib: &MaterialLibrary,
    item_type: &str,
    item_id: i64,
) -> Result<DocumentDetail> {
    let document = lib
        .db()
        .get_document(item_type, item_id)
        .await?
        .ok_or_else(|| Error::DocumentNotFound(format!("{} #{}", item_type, item_id)))?;
    let usages = lib.db().list_usages_for_item(item_type, item_id).await?;
    Ok(DocumentDetail { document, usages })
}

/// Propagate one material now and wait for the result
pub async fn cmd_propagate(lib: &MaterialLibrary, material_id: i64) -> Result<PropagationReport> {
    lib.propagator()
        .propagate_id(material_id)
        .await?
        .ok_or_else(|| Error::MaterialNotFound(material_id.to_string()))
}

/// Propagate every auto-update material
pub async fn cmd_refresh(lib: &MaterialLibrary, show_progress: bool) -> Result<RefreshReport> {
    let propagator = lib.propagator();
    let total = lib.db().list_auto_update_materials().await?.len();
    let pb = if show_progress {
        start_progress_bar(total, "Propagating materials")
    } else {
        None
    };

    let report = propagator
        .refresh(|material, _| {
            if let Some(pb) = &pb {
                pb.set_message(material.title.clone());
                pb.inc(1);
            }
        })
        .await?;

    if let Some(pb) = pb {
        pb.finish_with_message("Done");
    }
    Ok(report)
}

pub fn print_reconcile_report(item_type: &str, item_id: i64, report: &ReconcileReport) {
    println!("✓ Stored {} #{}", item_type, item_id);
    println!("  Linked: {:?}", report.linked);
    println!("  Unlinked: {:?}", report.unlinked);
    if !report.missing.is_empty() {
        println!("  Unknown material ids: {:?}", report.missing);
    }
}

pub fn print_document_detail(detail: &DocumentDetail) {
    let doc = &detail.document;
    println!(
        "\n📄 {} #{} (revision {}, updated {})\n",
        doc.item_type, doc.item_id, doc.revision, doc.updated_at
    );
    println!("{}", doc.content);
    println!("\nEmbeds {} material(s):", detail.usages.len());
    for usage in &detail.usages {
        println!("  #{}", usage.material_id);
    }
}

pub fn print_propagation_report(material_id: i64, report: &PropagationReport) {
    println!("\n✓ Propagated material #{}", material_id);
    print_propagation_totals(report);
}

fn print_propagation_totals(report: &PropagationReport) {
    println!("  Documents scanned: {}", report.documents_scanned);
    println!("  Documents updated: {}", report.documents_updated);
    println!("  Documents unchanged: {}", report.documents_unchanged);
    println!("  Documents skipped: {}", report.documents_skipped);
}

pub fn print_refresh_report(report: &RefreshReport) {
    println!("\n✓ Refreshed {} auto-update material(s)", report.materials);
    if report.failed > 0 {
        println!("  Failed: {}", report.failed);
    }
    print_propagation_totals(&report.totals);
}
