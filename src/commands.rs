//! Command handlers. Results go to stdout as JSON; logs go to stderr.

use std::{fs, path::Path, sync::Arc};

use futures::future::try_join_all;
use medtrack::{
    application::{
        aggregate::{Aggregator, ChildSpec},
        error::AppError,
        export::{ChildBundle, ExportArtifact, ExportOptions},
        query::{PageQuery, QueryService},
    },
    config::{ExportArgs, ExportTarget, GetArgs, SignArgs},
    domain::types::ResourceTag,
};
use medtrack_api_types::{Accessory, EquipmentRecord, MaintenanceRecord};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Map, Value, json};
use tracing::info;

use crate::{AppContext, CliError};

pub async fn get(app: &AppContext, args: GetArgs) -> Result<(), CliError> {
    let tag = ResourceTag::new(args.tag);
    let queries = &app.queries;

    let value: Value = if let Some(id) = args.id {
        queries.fetch_by_id(&tag, &id).await?
    } else if let Some(path) = args.path {
        queries.fetch_by_path(&tag, &path).await?
    } else if let (Some(page), Some(per_page)) = (args.page, args.per_page) {
        let mut query = PageQuery::new(page, per_page);
        query.filters = filter_map(args.filter).into_iter().collect();
        let page = queries.fetch_paginated::<Value>(&tag, &query).await?;
        serde_json::to_value(page)?
    } else if !args.filter.is_empty() {
        queries
            .fetch_by_query(&tag, &Value::Object(filter_map(args.filter)))
            .await?
    } else {
        queries.fetch_all(&tag).await?
    };

    print_json(&value)
}

pub async fn export(app: &AppContext, args: ExportArgs) -> Result<(), CliError> {
    let options = ExportOptions::new(match args.target {
        ExportTarget::Equipment => "curricula",
        ExportTarget::Maintenance => "maintenances",
    })
    .strict(args.strict);

    let artifact = match args.target {
        ExportTarget::Equipment => {
            let parents: Vec<EquipmentRecord> =
                fetch_records(&app.queries, &ResourceTag::EQUIPMENT, &args.ids).await?;
            let ids: Vec<String> = parents.iter().map(|record| record.id.clone()).collect();

            let accessories = Aggregator::<Accessory>::new(app.queries.clone())
                .aggregate(ids.clone(), ChildSpec::accessories());
            let maintenances = Aggregator::<MaintenanceRecord>::new(app.queries.clone())
                .aggregate(ids, ChildSpec::maintenances());
            let children: [Arc<dyn ChildBundle>; 2] = [accessories, maintenances];

            app.exports
                .export_bundle(&ResourceTag::EQUIPMENT, &parents, &children, &options)
                .await?
        }
        ExportTarget::Maintenance => {
            let records: Vec<MaintenanceRecord> =
                fetch_records(&app.queries, &ResourceTag::MAINTENANCE, &args.ids).await?;
            app.exports
                .export_grouped(
                    &ResourceTag::MAINTENANCE,
                    &records,
                    |record| record.equipment.clone(),
                    &options,
                )
                .await?
        }
    };

    match artifact {
        Some(artifact) => {
            let path = write_artifact(&args.out, &artifact)?;
            print_json(&json!({
                "archive": path,
                "rendered": artifact.summary.rendered,
                "omitted": artifact.summary.omitted,
            }))
        }
        None => print_json(&json!({ "skipped": "export already running" })),
    }
}

pub async fn sign(app: &AppContext, args: SignArgs) -> Result<(), CliError> {
    let signature = match (args.signature, args.signature_file) {
        (_, Some(path)) => fs::read_to_string(&path)
            .map_err(|source| CliError::InputFile { path, source })?,
        (Some(signature), None) => signature,
        (None, None) => {
            return Err(CliError::InvalidInput(
                "--signature or --signature-file is required".into(),
            ));
        }
    };

    let outcome = app
        .signing
        .sign_maintenances(&args.ids, &signature, args.strict)
        .await?;

    match outcome {
        Some(summary) => {
            let failed: Vec<Value> = summary
                .failed
                .iter()
                .map(|(id, error)| json!({ "id": id, "error": error }))
                .collect();
            print_json(&json!({ "succeeded": summary.succeeded, "failed": failed }))
        }
        None => print_json(&json!({ "skipped": "mass signing already running" })),
    }
}

async fn fetch_records<T>(
    queries: &QueryService,
    tag: &ResourceTag,
    ids: &[String],
) -> Result<Vec<T>, AppError>
where
    T: DeserializeOwned,
{
    if ids.is_empty() {
        return queries.fetch_all(tag).await;
    }
    try_join_all(ids.iter().map(|id| queries.fetch_by_id(tag, id))).await
}

fn filter_map(pairs: Vec<(String, String)>) -> Map<String, Value> {
    pairs
        .into_iter()
        .map(|(key, value)| (key, Value::String(value)))
        .collect()
}

fn write_artifact(dir: &Path, artifact: &ExportArtifact) -> Result<String, CliError> {
    fs::create_dir_all(dir).map_err(|source| CliError::OutputFile {
        path: dir.to_path_buf(),
        source,
    })?;
    let path = dir.join(&artifact.file_name);
    fs::write(&path, &artifact.bytes).map_err(|source| CliError::OutputFile {
        path: path.clone(),
        source,
    })?;
    info!(path = %path.display(), bytes = artifact.bytes.len(), "archive written");
    Ok(path.display().to_string())
}

fn print_json<T: Serialize>(value: &T) -> Result<(), CliError> {
    let out = serde_json::to_string_pretty(value)?;
    println!("{out}");
    Ok(())
}
