//! `patchwright ingest` command: a manual stand-in for the webhook adapter,
//! useful for demos and local testing without wiring up a real CI provider.

use anyhow::{Context, Result};
use sqlx::PgPool;

use patchwright_db::errors::CreateBuildError;
use patchwright_db::queries::builds;

pub async fn run_ingest(
    pool: &PgPool,
    job: &str,
    build_number: i64,
    branch: &str,
    commit_sha: &str,
    repository_url: Option<&str>,
) -> Result<()> {
    let fields = builds::NewBuild {
        job: job.to_owned(),
        build_number,
        branch: branch.to_owned(),
        repository_url: repository_url.unwrap_or("").to_owned(),
        commit_sha: commit_sha.to_owned(),
        ingress_payload: serde_json::json!({ "source": "cli-ingest" }),
    };

    match builds::create_build(pool, fields).await {
        Ok(build) => {
            println!("Build created: {} ({} #{})", build.id, build.job, build.build_number);
            Ok(())
        }
        Err(CreateBuildError::Duplicate { job, build_number }) => {
            Err(anyhow::anyhow!("build {job}#{build_number} already exists"))
        }
        Err(CreateBuildError::Other(e)) => Err(e).context("failed to create build"),
    }
}
