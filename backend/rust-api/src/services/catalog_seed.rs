use anyhow::{Context, Result};
use std::path::Path;
use tokio::fs;

use crate::config::Config;
use crate::error::QuizError;
use crate::models::CatalogBundle;
use crate::repositories::CatalogRepository;

/// Loads tests and questions from `catalog_seed_path` into the catalog.
///
/// Entries are upserted by id, so rerunning with the same file is harmless.
/// Questions rejected by the catalog are logged and skipped.
pub async fn bootstrap(config: &Config, catalog: &dyn CatalogRepository) -> Result<()> {
    let path = match &config.catalog_seed_path {
        Some(path) if !path.is_empty() => Path::new(path),
        _ => {
            tracing::debug!("No catalog seed file configured, skipping bootstrap");
            return Ok(());
        }
    };

    if !path.exists() {
        tracing::warn!(
            "Catalog seed file {} not found, skipping bootstrap",
            path.display()
        );
        return Ok(());
    }

    let contents = fs::read_to_string(path)
        .await
        .context("Failed to read catalog seed file")?;
    let bundle: CatalogBundle =
        serde_json::from_str(&contents).context("Failed to deserialize catalog seed payload")?;

    let report = load_bundle(catalog, bundle).await?;
    tracing::info!(
        tests = report.tests,
        questions = report.questions,
        skipped = report.skipped,
        "Catalog seeded from {}",
        path.display()
    );

    Ok(())
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct SeedReport {
    pub tests: usize,
    pub questions: usize,
    pub skipped: usize,
}

pub async fn load_bundle(
    catalog: &dyn CatalogRepository,
    bundle: CatalogBundle,
) -> Result<SeedReport> {
    let mut report = SeedReport::default();

    for test in bundle.tests {
        catalog
            .save_test(test)
            .await
            .context("Failed to store seeded test")?;
        report.tests += 1;
    }

    for question in bundle.questions {
        let question_id = question.id.clone();
        match catalog.save_question(question).await {
            Ok(()) => report.questions += 1,
            Err(err @ QuizError::InvalidQuestion { .. }) => {
                tracing::warn!(question_id, error = %err, "Skipping seeded question");
                report.skipped += 1;
            }
            Err(err) => return Err(err).context("Failed to store seeded question"),
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Question, QuestionOption, TestDefinition};
    use crate::repositories::MemoryCatalog;

    fn option(is_true: bool) -> QuestionOption {
        QuestionOption {
            text: Some(is_true.to_string()),
            image: None,
            is_true,
        }
    }

    #[tokio::test]
    async fn loads_bundle_and_skips_invalid_questions() {
        let catalog = MemoryCatalog::new();
        let bundle = CatalogBundle {
            tests: vec![TestDefinition {
                id: 1,
                name: "History".to_string(),
                description: String::new(),
                subject_id: 2,
                subject_name: "Humanities".to_string(),
                author_id: "lect-1".to_string(),
                tasks_num: 1,
                duration_seconds: 120,
            }],
            questions: vec![
                Question {
                    id: "ok".to_string(),
                    test_id: 1,
                    formulation: "Year?".to_string(),
                    multiselect: false,
                    options: vec![option(true), option(false)],
                },
                Question {
                    id: "broken".to_string(),
                    test_id: 1,
                    formulation: "Nothing is right".to_string(),
                    multiselect: false,
                    options: vec![option(false)],
                },
            ],
        };

        let report = load_bundle(&catalog, bundle).await.unwrap();
        assert_eq!(
            report,
            SeedReport {
                tests: 1,
                questions: 1,
                skipped: 1
            }
        );
        assert_eq!(catalog.count_questions(1).await.unwrap(), 1);
    }
}
