//! Jira connector (Cloud and Server / Data Center).
//!
//! Imports five tables through the REST API v2 and the Agile API:
//!
//! | Table | Endpoint | Notes |
//! |-------|----------|-------|
//! | `issues` | `/rest/api/2/search` | `startAt`/`maxResults=100` until `total` |
//! | `worklogs` | `/rest/api/2/search?fields=key,worklog` | issues with work logged in the last 30 days |
//! | `projects` | `/rest/api/2/project` | |
//! | `users` | `/rest/api/3/users/search` (Cloud), `/rest/api/2/user/search` (Server) | |
//! | `sprints` | `/rest/agile/1.0/board/{id}/sprint` | scrum boards only |
//!
//! Both instance types use basic auth: email + API token on Cloud,
//! username + password on Server.
//!
//! Issues are reduced to named columns rather than generic flattening.
//! Custom fields are looked up in `/rest/api/2/field` and stored under
//! their sanitized display name.
//!
//! # Refresh
//!
//! Issues are upserted on `key`, fetching only those updated on or after the
//! day of the newest local `updated` value. Worklogs, projects, and sprints
//! are re-fetched and upserted on `id`.

use anyhow::{bail, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde_json::Value;
use std::collections::HashSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::db::open_store;
use crate::flatten::format_value;
use crate::http::{array_objects, client, error_status, get_json_until, is_cancelled, objects_at};
use crate::models::{DataSource, DataSourceConfig, Record, RefreshResult, SourceKind};
use crate::refresh::{max_value, note_failures, upsert_records};
use crate::sanitize::sanitize_name;
use crate::traits::{
    import_resources, record_tables, ImportContext, Importer, RefreshContext, Refresher,
    ResourceFetcher,
};

const PAGE_SIZE: usize = 100;

/// Prepend `https://` when no scheme is given and drop trailing slashes.
pub fn normalize_base_url(url: &str) -> String {
    let url = url.trim().trim_end_matches('/');
    if url.starts_with("http://") || url.starts_with("https://") {
        url.to_string()
    } else {
        format!("https://{}", url)
    }
}

fn require_credentials(config: &DataSourceConfig) -> Result<()> {
    if config.jira_base_url.trim().is_empty() {
        bail!("Jira base URL is required");
    }
    if config.jira_username.trim().is_empty() {
        bail!("Jira username/email is required");
    }
    if config.jira_api_token.trim().is_empty() {
        bail!("Jira API token/password is required");
    }
    Ok(())
}

/// Issue-search JQL, newest updates first.
fn issues_jql(project_key: &str, updated_since: Option<&str>) -> String {
    let mut clauses = Vec::new();
    if !project_key.is_empty() {
        clauses.push(format!("project = {}", project_key));
    }
    if let Some(since) = updated_since {
        clauses.push(format!("updated > '{}'", since));
    }
    if clauses.is_empty() {
        "ORDER BY updated DESC".to_string()
    } else {
        format!("{} ORDER BY updated DESC", clauses.join(" AND "))
    }
}

fn worklogs_jql(project_key: &str) -> String {
    if project_key.is_empty() {
        "worklogDate >= -30d ORDER BY updated DESC".to_string()
    } else {
        format!(
            "project = {} AND worklogDate >= -30d ORDER BY updated DESC",
            project_key
        )
    }
}

/// A custom field: `customfield_10020` → `"Sprint"`.
#[derive(Debug, Clone)]
struct CustomField {
    id: String,
    column: String,
}

struct JiraApi {
    client: Client,
    base: String,
    username: String,
    token: String,
    cloud: bool,
    project_key: String,
    cancel: CancellationToken,
}

impl JiraApi {
    fn from_config(
        config: &DataSourceConfig,
        settings: &Config,
        cancel: &CancellationToken,
    ) -> Result<Self> {
        require_credentials(config)?;
        Ok(Self {
            client: client(settings.http.long_timeout_secs)?,
            base: normalize_base_url(&config.jira_base_url),
            username: config.jira_username.trim().to_string(),
            token: config.jira_api_token.trim().to_string(),
            cloud: !config.jira_instance_type.trim().eq_ignore_ascii_case("server"),
            project_key: config.jira_project_key.trim().to_string(),
            cancel: cancel.clone(),
        })
    }

    fn get(&self, path: &str) -> RequestBuilder {
        self.client
            .get(format!("{}{}", self.base, path))
            .basic_auth(&self.username, Some(&self.token))
            .header("Accept", "application/json")
    }

    async fn json(&self, req: RequestBuilder) -> Result<Value> {
        get_json_until(req, &self.cancel).await
    }

    /// Custom field catalogue. Failures leave custom fields unmapped.
    async fn custom_fields(&self) -> Vec<CustomField> {
        let body = match self.json(self.get("/rest/api/2/field")).await {
            Ok(body) => body,
            Err(e) => {
                warn!(error = %e, "failed to fetch Jira custom fields");
                return Vec::new();
            }
        };
        let fields = body.as_array().map(|a| array_objects(a)).unwrap_or_default();
        let mapped: Vec<CustomField> = fields
            .iter()
            .filter(|f| f.get("custom").and_then(Value::as_bool) == Some(true))
            .filter_map(|f| {
                let id = f.get("id")?.as_str()?;
                let name = f.get("name").and_then(Value::as_str)?;
                id.starts_with("customfield_").then(|| CustomField {
                    id: id.to_string(),
                    column: sanitize_name(name),
                })
            })
            .collect();
        debug!(count = mapped.len(), "mapped Jira custom fields");
        mapped
    }

    async fn search_issues(&self, jql: &str, custom: &[CustomField]) -> Result<Vec<Record>> {
        let mut issues = Vec::new();
        let mut start_at = 0usize;
        loop {
            let req = self.get("/rest/api/2/search").query(&[
                ("jql", jql.to_string()),
                ("startAt", start_at.to_string()),
                ("maxResults", PAGE_SIZE.to_string()),
            ]);
            let body = self.json(req).await?;
            let page = objects_at(&body, "issues");
            let fetched = page.len();
            issues.extend(page.iter().map(|i| flatten_issue(i, custom)));

            let total = body.get("total").and_then(Value::as_u64).unwrap_or(0) as usize;
            start_at += PAGE_SIZE;
            if start_at >= total || fetched == 0 {
                break;
            }
            debug!(fetched = start_at, total, "fetching Jira issues");
        }
        Ok(issues)
    }

    async fn worklogs(&self) -> Result<Vec<Record>> {
        let req = self.get("/rest/api/2/search").query(&[
            ("jql", worklogs_jql(&self.project_key)),
            ("maxResults", PAGE_SIZE.to_string()),
            ("fields", "key,worklog".to_string()),
        ]);
        let body = self.json(req).await?;
        let mut worklogs = Vec::new();
        for issue in objects_at(&body, "issues") {
            let key = issue.get("key").cloned().unwrap_or(Value::Null);
            let entries = issue
                .get("fields")
                .and_then(|f| f.get("worklog"))
                .map(|w| objects_at(w, "worklogs"))
                .unwrap_or_default();
            for entry in entries {
                worklogs.push(flatten_worklog(&entry, &key));
            }
        }
        Ok(worklogs)
    }

    async fn projects(&self) -> Result<Vec<Record>> {
        let body = self.json(self.get("/rest/api/2/project")).await?;
        let projects = body.as_array().map(|a| array_objects(a)).unwrap_or_default();
        Ok(projects
            .iter()
            .map(|p| {
                let mut flat = Record::new();
                copy(&mut flat, "id", p.get("id"));
                copy(&mut flat, "key", p.get("key"));
                copy(&mut flat, "name", p.get("name"));
                copy(&mut flat, "lead", nested(p, "lead", "displayName"));
                copy(&mut flat, "project_type", p.get("projectTypeKey"));
                flat
            })
            .collect())
    }

    async fn users(&self) -> Result<Vec<Record>> {
        let body = if self.cloud {
            match self.json(self.get("/rest/api/3/users/search?maxResults=1000")).await {
                Ok(body) => body,
                Err(e) if is_cancelled(&e) => return Err(e),
                Err(e) => {
                    debug!(error = %e, "Jira users v3 failed, trying v2");
                    self.json(self.get("/rest/api/2/users/search?maxResults=1000")).await?
                }
            }
        } else {
            self.json(self.get(
                "/rest/api/2/user/search?username=.&maxResults=1000&includeInactive=true",
            ))
            .await?
        };
        let users = body.as_array().map(|a| array_objects(a)).unwrap_or_default();
        Ok(users
            .iter()
            .map(|u| {
                let mut flat = Record::new();
                if self.cloud {
                    copy(&mut flat, "account_id", u.get("accountId"));
                } else {
                    copy(&mut flat, "user_key", u.get("key"));
                    copy(&mut flat, "username", u.get("name"));
                }
                copy(&mut flat, "display_name", u.get("displayName"));
                copy(&mut flat, "email_address", u.get("emailAddress"));
                copy(&mut flat, "active", u.get("active"));
                if self.cloud {
                    copy(&mut flat, "account_type", u.get("accountType"));
                }
                flat
            })
            .collect())
    }

    async fn sprints(&self) -> Result<Vec<Record>> {
        let boards = match self.json(self.get("/rest/agile/1.0/board")).await {
            Ok(body) => objects_at(&body, "values"),
            Err(e) if error_status(&e) == Some(404) => {
                bail!("Agile API not available, Jira Software may not be installed")
            }
            Err(e) => return Err(e),
        };

        let mut seen = HashSet::new();
        let mut sprints = Vec::new();
        for board in boards {
            let board_type = board.get("type").and_then(Value::as_str).unwrap_or("");
            if !board_type.is_empty() && board_type != "scrum" {
                continue;
            }
            let Some(board_id) = board.get("id").and_then(format_value) else {
                continue;
            };
            let board_name = board.get("name").and_then(format_value).unwrap_or_default();
            let body = match self.json(self.get(&format!("/rest/agile/1.0/board/{}/sprint", board_id))).await {
                Ok(body) => body,
                Err(e) if is_cancelled(&e) => return Err(e),
                Err(e) => {
                    warn!(board = %board_name, error = %e, "failed to fetch sprints for board");
                    continue;
                }
            };
            for sprint in objects_at(&body, "values") {
                let Some(id) = sprint.get("id").and_then(format_value) else {
                    continue;
                };
                if !seen.insert(id) {
                    continue;
                }
                let mut flat = Record::new();
                copy(&mut flat, "id", sprint.get("id"));
                copy(&mut flat, "name", sprint.get("name"));
                copy(&mut flat, "state", sprint.get("state"));
                copy(&mut flat, "start_date", sprint.get("startDate"));
                copy(&mut flat, "end_date", sprint.get("endDate"));
                copy(&mut flat, "complete_date", sprint.get("completeDate"));
                flat.insert("board_id".into(), Value::String(board_id.clone()));
                flat.insert("board_name".into(), Value::String(board_name.clone()));
                copy(&mut flat, "origin_board_id", sprint.get("originBoardId"));
                copy(&mut flat, "goal", sprint.get("goal"));
                sprints.push(flat);
            }
        }
        Ok(sprints)
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Record shaping
// ═══════════════════════════════════════════════════════════════════════

fn copy(flat: &mut Record, column: &str, value: Option<&Value>) {
    flat.insert(column.to_string(), value.cloned().unwrap_or(Value::Null));
}

fn nested<'a>(obj: &'a Record, field: &str, key: &str) -> Option<&'a Value> {
    obj.get(field)?.get(key)
}

/// Comma-joined `name` of every object in an array field.
fn joined_names(values: &[Value]) -> String {
    values
        .iter()
        .filter_map(|v| v.get("name").and_then(format_value))
        .collect::<Vec<_>>()
        .join(",")
}

/// Scalar rendering of a custom field value: option and user objects by
/// name, arrays comma-joined.
fn custom_value(value: &Value) -> Option<Value> {
    match value {
        Value::Null => None,
        Value::Array(items) if items.is_empty() => None,
        Value::Array(items) => {
            let parts: Vec<String> = items
                .iter()
                .filter_map(|item| match item {
                    Value::Object(obj) => ["name", "value"]
                        .iter()
                        .find_map(|k| obj.get(*k).and_then(Value::as_str))
                        .map(str::to_string),
                    other => format_value(other),
                })
                .collect();
            Some(Value::String(parts.join(",")))
        }
        Value::Object(obj) => ["name", "value", "displayName"]
            .iter()
            .find_map(|k| obj.get(*k).and_then(Value::as_str))
            .map(|s| Value::String(s.to_string())),
        other => Some(other.clone()),
    }
}

/// One issue as a row of named columns.
fn flatten_issue(issue: &Record, custom: &[CustomField]) -> Record {
    let mut flat = Record::new();
    copy(&mut flat, "key", issue.get("key"));
    copy(&mut flat, "id", issue.get("id"));
    let Some(fields) = issue.get("fields").and_then(Value::as_object) else {
        return flat;
    };

    for (column, field) in [
        ("summary", "summary"),
        ("description", "description"),
        ("created", "created"),
        ("updated", "updated"),
        ("resolutiondate", "resolutiondate"),
        ("duedate", "duedate"),
    ] {
        copy(&mut flat, column, fields.get(field));
    }

    if let Some(status) = fields.get("status") {
        copy(&mut flat, "status", status.get("name"));
        copy(
            &mut flat,
            "status_category",
            status.get("statusCategory").and_then(|c| c.get("name")),
        );
    }
    for (column, field) in [
        ("priority", "priority"),
        ("issue_type", "issuetype"),
        ("resolution", "resolution"),
    ] {
        if let Some(v) = nested(fields, field, "name") {
            copy(&mut flat, column, Some(v));
        }
    }
    if let Some(project) = fields.get("project") {
        copy(&mut flat, "project_key", project.get("key"));
        copy(&mut flat, "project_name", project.get("name"));
    }
    if let Some(assignee) = fields.get("assignee").filter(|v| v.is_object()) {
        copy(&mut flat, "assignee", assignee.get("displayName"));
        copy(&mut flat, "assignee_email", assignee.get("emailAddress"));
        copy(
            &mut flat,
            "assignee_id",
            assignee.get("accountId").or_else(|| assignee.get("name")),
        );
    }
    if let Some(reporter) = fields.get("reporter").filter(|v| v.is_object()) {
        copy(&mut flat, "reporter", reporter.get("displayName"));
        copy(&mut flat, "reporter_email", reporter.get("emailAddress"));
    }
    if let Some(v) = nested(fields, "creator", "displayName") {
        copy(&mut flat, "creator", Some(v));
    }

    if let Some(labels) = fields.get("labels").and_then(Value::as_array) {
        if !labels.is_empty() {
            let joined: Vec<String> = labels.iter().filter_map(format_value).collect();
            flat.insert("labels".into(), Value::String(joined.join(",")));
        }
    }
    for (column, field) in [
        ("components", "components"),
        ("fix_versions", "fixVersions"),
        ("affected_versions", "versions"),
    ] {
        if let Some(items) = fields.get(field).and_then(Value::as_array) {
            if !items.is_empty() {
                flat.insert(column.into(), Value::String(joined_names(items)));
            }
        }
    }

    if let Some(tracking) = fields.get("timetracking").filter(|v| v.is_object()) {
        for (column, key) in [
            ("original_estimate", "originalEstimate"),
            ("remaining_estimate", "remainingEstimate"),
            ("time_spent", "timeSpent"),
            ("original_estimate_seconds", "originalEstimateSeconds"),
            ("remaining_estimate_seconds", "remainingEstimateSeconds"),
            ("time_spent_seconds", "timeSpentSeconds"),
        ] {
            copy(&mut flat, column, tracking.get(key));
        }
    }
    if let Some(total) = nested(fields, "worklog", "total") {
        copy(&mut flat, "worklog_count", Some(total));
    }
    if let Some(total) = nested(fields, "comment", "total") {
        copy(&mut flat, "comment_count", Some(total));
    }
    if let Some(subtasks) = fields.get("subtasks").and_then(Value::as_array) {
        flat.insert("subtask_count".into(), Value::from(subtasks.len()));
    }
    if let Some(parent) = nested(fields, "parent", "key") {
        copy(&mut flat, "parent_key", Some(parent));
    }
    if let Some(env) = fields.get("environment").filter(|v| v.is_string()) {
        copy(&mut flat, "environment", Some(env));
    }

    for field in custom {
        if let Some(value) = fields.get(&field.id).and_then(custom_value) {
            flat.insert(field.column.clone(), value);
        }
    }
    flat
}

fn flatten_worklog(entry: &Record, issue_key: &Value) -> Record {
    let mut flat = Record::new();
    copy(&mut flat, "id", entry.get("id"));
    flat.insert("issue_key".into(), issue_key.clone());
    copy(&mut flat, "started", entry.get("started"));
    copy(&mut flat, "time_spent", entry.get("timeSpent"));
    copy(&mut flat, "time_spent_seconds", entry.get("timeSpentSeconds"));
    copy(&mut flat, "comment", entry.get("comment"));
    copy(&mut flat, "created", entry.get("created"));
    copy(&mut flat, "updated", entry.get("updated"));
    if let Some(author) = entry.get("author").filter(|v| v.is_object()) {
        copy(&mut flat, "author", author.get("displayName"));
        copy(&mut flat, "author_email", author.get("emailAddress"));
        copy(
            &mut flat,
            "author_id",
            author.get("accountId").or_else(|| author.get("name")),
        );
    }
    if let Some(v) = nested(entry, "updateAuthor", "displayName") {
        copy(&mut flat, "update_author", Some(v));
    }
    flat
}

// ═══════════════════════════════════════════════════════════════════════
// Import / refresh
// ═══════════════════════════════════════════════════════════════════════

#[async_trait]
impl ResourceFetcher for JiraApi {
    fn platform(&self) -> &str {
        "Jira"
    }

    fn resources(&self) -> Vec<&'static str> {
        vec!["issues", "worklogs", "projects", "users", "sprints"]
    }

    async fn fetch(&self, resource: &str) -> Result<Vec<(String, Vec<Record>)>> {
        let records = match resource {
            "issues" => {
                let custom = self.custom_fields().await;
                self.search_issues(&issues_jql(&self.project_key, None), &custom)
                    .await?
            }
            "worklogs" => self.worklogs().await?,
            "projects" => self.projects().await?,
            "users" => self.users().await?,
            "sprints" => self.sprints().await?,
            other => bail!("unknown Jira resource: {}", other),
        };
        Ok(vec![(resource.to_string(), records)])
    }
}

pub struct Jira;

#[async_trait]
impl Importer for Jira {
    fn kind(&self) -> SourceKind {
        SourceKind::Jira
    }

    fn validate(&self, config: &DataSourceConfig) -> Result<()> {
        require_credentials(config)
    }

    async fn import(&self, ctx: &ImportContext<'_>, ds: &mut DataSource) -> Result<()> {
        let api = JiraApi::from_config(&ds.config, ctx.config, &ctx.cancel)?;
        if ds.config.jira_instance_type.trim().is_empty() {
            ds.config.jira_instance_type = "cloud".to_string();
        }
        info!(base = %api.base, cloud = api.cloud, "importing Jira");
        let pool = open_store(&ctx.store_path).await?;
        let tables = import_resources(&api, &pool).await;
        pool.close().await;
        record_tables(ds, tables?);
        Ok(())
    }
}

#[async_trait]
impl Refresher for Jira {
    fn kind(&self) -> SourceKind {
        SourceKind::Jira
    }

    async fn refresh(
        &self,
        ctx: &RefreshContext<'_>,
        ds: &DataSource,
        result: &mut RefreshResult,
    ) -> Result<()> {
        let api = JiraApi::from_config(&ds.config, ctx.config, &ctx.cancel)?;
        let pool = ctx.pool;
        let mut failures = Vec::new();

        let since = match max_value(pool, "issues", "updated").await {
            Ok(latest) => latest.map(|s| s.chars().take(10).collect::<String>()),
            Err(e) => {
                warn!(error = %e, "no usable issue timestamps, fetching all issues");
                None
            }
        };
        let custom = api.custom_fields().await;
        let jql = issues_jql(&api.project_key, since.as_deref());
        debug!(jql = %jql, "refreshing Jira issues");

        let issues = match api.search_issues(&jql, &custom).await {
            Ok(issues) => upsert_records(pool, "issues", "key", &issues).await,
            Err(e) => Err(e),
        };
        match issues {
            Ok(n) => result.record("issues", n),
            Err(e) if is_cancelled(&e) => return Err(e),
            Err(e) => {
                warn!(error = %e, "failed to refresh Jira issues");
                failures.push(format!("issues: {:#}", e));
            }
        }

        for table in ["worklogs", "projects", "sprints"] {
            let fetched = match table {
                "worklogs" => api.worklogs().await,
                "projects" => api.projects().await,
                _ => api.sprints().await,
            };
            let written = match fetched {
                Ok(records) => upsert_records(pool, table, "id", &records).await,
                Err(e) => Err(e),
            };
            match written {
                Ok(n) => result.record(table, n),
                Err(e) if is_cancelled(&e) => return Err(e),
                Err(e) => {
                    warn!(table, error = %e, "failed to refresh Jira table");
                    failures.push(format!("{}: {:#}", table, e));
                }
            }
        }

        info!(total = result.total_new_rows, "Jira refresh finished");
        note_failures(result, 4, failures)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn required_fields_in_order() {
        let mut cfg = DataSourceConfig::default();
        assert_eq!(
            Jira.validate(&cfg).unwrap_err().to_string(),
            "Jira base URL is required"
        );
        cfg.jira_base_url = "acme.atlassian.net".into();
        assert!(Jira.validate(&cfg).unwrap_err().to_string().contains("username"));
        cfg.jira_username = "ops@acme.io".into();
        assert!(Jira.validate(&cfg).unwrap_err().to_string().contains("API token"));
        cfg.jira_api_token = "t".into();
        assert!(Jira.validate(&cfg).is_ok());
    }

    #[test]
    fn base_urls_normalize() {
        assert_eq!(normalize_base_url("acme.atlassian.net/"), "https://acme.atlassian.net");
        assert_eq!(normalize_base_url("http://jira.local:8080"), "http://jira.local:8080");
    }

    #[test]
    fn jql_composition() {
        assert_eq!(issues_jql("", None), "ORDER BY updated DESC");
        assert_eq!(
            issues_jql("OPS", Some("2024-03-01")),
            "project = OPS AND updated > '2024-03-01' ORDER BY updated DESC"
        );
        assert_eq!(
            worklogs_jql("OPS"),
            "project = OPS AND worklogDate >= -30d ORDER BY updated DESC"
        );
    }

    #[test]
    fn issues_flatten_to_named_columns() {
        let issue = json!({
            "key": "OPS-7",
            "id": "10007",
            "fields": {
                "summary": "Disk full",
                "updated": "2024-03-02T10:00:00.000+0000",
                "status": {"name": "Done", "statusCategory": {"name": "Complete"}},
                "priority": {"name": "High"},
                "issuetype": {"name": "Bug"},
                "project": {"key": "OPS", "name": "Operations"},
                "assignee": {"displayName": "Ada", "accountId": "abc"},
                "labels": ["infra", "urgent"],
                "components": [{"name": "db"}, {"name": "api"}],
                "subtasks": [{}, {}],
                "customfield_10020": [{"name": "Sprint 4"}],
                "customfield_10030": {"value": "Gold"}
            }
        });
        let custom = vec![
            CustomField {
                id: "customfield_10020".into(),
                column: sanitize_name("Sprint"),
            },
            CustomField {
                id: "customfield_10030".into(),
                column: sanitize_name("Support Tier"),
            },
        ];
        let flat = flatten_issue(issue.as_object().unwrap(), &custom);
        assert_eq!(flat["key"], "OPS-7");
        assert_eq!(flat["status"], "Done");
        assert_eq!(flat["status_category"], "Complete");
        assert_eq!(flat["issue_type"], "Bug");
        assert_eq!(flat["assignee_id"], "abc");
        assert_eq!(flat["labels"], "infra,urgent");
        assert_eq!(flat["components"], "db,api");
        assert_eq!(flat["subtask_count"], 2);
        assert_eq!(flat["Sprint"], "Sprint 4");
        assert_eq!(flat["Support_Tier"], "Gold");
    }

    #[test]
    fn worklogs_carry_issue_key() {
        let entry = json!({
            "id": "501",
            "timeSpentSeconds": 3600,
            "author": {"displayName": "Ada", "name": "ada"},
            "updateAuthor": {"displayName": "Bob"}
        });
        let flat = flatten_worklog(entry.as_object().unwrap(), &json!("OPS-7"));
        assert_eq!(flat["issue_key"], "OPS-7");
        assert_eq!(flat["author_id"], "ada");
        assert_eq!(flat["update_author"], "Bob");
        assert_eq!(flat["time_spent_seconds"], 3600);
    }
}
