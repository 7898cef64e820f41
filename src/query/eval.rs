//! Query execution.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use crate::clock::ClockSpec;
use crate::daemon::cookies::CookieSyncError;
use crate::daemon::root::Root;
use crate::view::QueryableView;

use super::expr::EvaluateResult;
use super::fields::render_fields;
use super::{Query, QueryContext, QueryExecError, QueryResult, QuerySyncTimeout};

/// Run a query against a root.
///
/// The clock is sampled before any generator iterates so the caller can use
/// it as the `since` of the next query without missing updates.
pub fn execute(query: &Query, root: &Root) -> Result<QueryResult, QueryExecError> {
    let view = root.view();
    let clock_at_start = view.current_clock();

    if query.sync_timeout > Duration::ZERO {
        let handle = root.cookies().sync()?;
        match handle.wait(query.sync_timeout) {
            Ok(()) => {}
            Err(CookieSyncError::Timeout { .. }) => {
                return Err(QuerySyncTimeout {
                    timeout: query.sync_timeout,
                }
                .into());
            }
            Err(other) => return Err(other.into()),
        }
    }

    let since_ticks = match &query.since_spec {
        Some(ClockSpec::Clock(pos)) => Some(pos.ticks),
        _ => None,
    };

    // Generator choice: time wins when a since spec is present.
    let files = if query.since_spec.is_some() {
        view.time_generator(query)?
    } else if let Some(paths) = &query.paths {
        view.path_generator(query, paths)?
    } else if let Some(globs) = &query.globs {
        view.glob_generator(query, globs)?
    } else {
        view.all_files_generator(query)?
    };

    let rel_prefix = relative_root_prefix(query, root.path())?;

    let mut ctx = QueryContext {
        query,
        clock_at_start,
        since_ticks,
        whole_name: String::new(),
    };

    let mut results = Vec::new();
    let mut deduped_file_names = Vec::new();
    let mut seen = HashSet::new();

    for mut file in files {
        let Some(whole_name) = project_name(file.name(), rel_prefix.as_deref()) else {
            continue;
        };
        ctx.whole_name = whole_name;

        let matched = match &query.expression {
            None => true,
            Some(expr) => {
                let mut outcome = expr.evaluate(&ctx, file.as_ref());
                if let EvaluateResult::NeedsData(fields) = outcome {
                    file.fetch(fields)?;
                    outcome = expr.evaluate(&ctx, file.as_ref());
                }
                match outcome {
                    EvaluateResult::Match => true,
                    EvaluateResult::NoMatch => false,
                    EvaluateResult::NeedsData(_) => {
                        return Err(QueryExecError::Failed(format!(
                            "file {} still missing data after fetch",
                            ctx.whole_name
                        )));
                    }
                }
            }
        };
        if !matched {
            continue;
        }

        if query.dedup_results {
            if !seen.insert(ctx.whole_name.clone()) {
                continue;
            }
            deduped_file_names.push(ctx.whole_name.clone());
        }

        results.push(render_fields(
            &query.field_list,
            file.as_mut(),
            &ctx.whole_name,
            since_ticks,
        )?);
    }

    Ok(QueryResult {
        results,
        clock_at_start_of_query: clock_at_start,
        deduped_file_names,
        is_fresh_instance: since_ticks.is_none(),
    })
}

/// Resolve the query's relative root to a prefix of wholenames, or `None`
/// when the query spans the whole root.
fn relative_root_prefix(
    query: &Query,
    root_path: &Path,
) -> Result<Option<String>, QueryExecError> {
    let Some(rel) = &query.relative_root else {
        return Ok(None);
    };
    let p = Path::new(rel);
    let rel = if p.is_absolute() {
        p.strip_prefix(root_path)
            .map_err(|_| {
                QueryExecError::Failed(format!(
                    "relative_root {rel:?} is not within the watched root"
                ))
            })?
            .to_string_lossy()
            .into_owned()
    } else {
        rel.clone()
    };
    let rel = rel.trim_matches('/').to_string();
    if rel.is_empty() {
        Ok(None)
    } else {
        Ok(Some(rel))
    }
}

fn project_name(name: &str, rel_prefix: Option<&str>) -> Option<String> {
    match rel_prefix {
        None => Some(name.to_string()),
        Some(prefix) => name
            .strip_prefix(prefix)
            .and_then(|rest| rest.strip_prefix('/'))
            .map(str::to_string),
    }
}
