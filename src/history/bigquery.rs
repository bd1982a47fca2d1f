use async_trait::async_trait;
use log::{ debug, error, info };
use reqwest::{ Client as HttpClient, header::AUTHORIZATION };
use serde::{ Deserialize, Serialize };
use serde_json::Value as JsonValue;
use std::error::Error;
use std::sync::Arc;

use super::{ ConversationTable, ExportRow, TableRef };
use crate::config::credentials::TokenSource;

const QUERY_TIMEOUT_MS: u64 = 10_000;
const MAX_QUERY_POLLS: usize = 60;

/// Conversation table stored in BigQuery, accessed through the REST API.
pub struct BigQueryTable {
    http: HttpClient,
    table: TableRef,
    billing_project: String,
    base_url: String,
    token_source: Arc<dyn TokenSource>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InsertAllRequest<'a> {
    skip_invalid_rows: bool,
    ignore_unknown_values: bool,
    rows: Vec<InsertRow<'a>>,
}

#[derive(Serialize)]
struct InsertRow<'a> {
    json: &'a ExportRow,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InsertAllResponse {
    #[serde(default)]
    insert_errors: Vec<InsertError>,
}

#[derive(Deserialize, Debug)]
struct InsertError {
    index: u64,
    #[serde(default)]
    errors: Vec<ErrorProto>,
}

#[derive(Deserialize, Debug)]
struct ErrorProto {
    #[serde(default)]
    reason: String,
    #[serde(default)]
    message: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest {
    query: String,
    use_legacy_sql: bool,
    timeout_ms: u64,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
struct JobReference {
    job_id: String,
    location: Option<String>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct QueryResponse {
    #[serde(default)]
    job_complete: bool,
    job_reference: Option<JobReference>,
    #[serde(default)]
    rows: Vec<TableRow>,
    page_token: Option<String>,
    #[serde(default)]
    errors: Vec<ErrorProto>,
}

#[derive(Deserialize, Debug)]
struct TableRow {
    f: Vec<TableCell>,
}

#[derive(Deserialize, Debug)]
struct TableCell {
    v: JsonValue,
}

fn describe_errors(errors: &[ErrorProto]) -> String {
    errors
        .iter()
        .map(|e| format!("{}: {}", e.reason, e.message))
        .collect::<Vec<_>>()
        .join("; ")
}

fn first_column_strings(rows: Vec<TableRow>) -> impl Iterator<Item = String> {
    rows.into_iter().filter_map(|row| {
        row.f.into_iter().next().and_then(|cell| match cell.v {
            JsonValue::String(s) => Some(s),
            JsonValue::Null => None,
            other => Some(other.to_string()),
        })
    })
}

impl BigQueryTable {
    pub fn new(
        table: TableRef,
        billing_project: String,
        base_url: String,
        token_source: Arc<dyn TokenSource>
    ) -> Self {
        Self {
            http: HttpClient::new(),
            table,
            billing_project,
            base_url: base_url.trim_end_matches('/').to_string(),
            token_source,
        }
    }

    fn insert_all_url(&self) -> String {
        format!(
            "{}/projects/{}/datasets/{}/tables/{}/insertAll",
            self.base_url,
            self.table.project,
            self.table.dataset,
            self.table.table
        )
    }

    fn user_contents_sql(&self) -> String {
        format!("SELECT content FROM `{}` WHERE role = 'user'", self.table)
    }

    async fn bearer(&self) -> Result<String, Box<dyn Error + Send + Sync>> {
        Ok(format!("Bearer {}", self.token_source.access_token().await?))
    }

    async fn get_query_results(
        &self,
        job: &JobReference,
        page_token: Option<&str>
    ) -> Result<QueryResponse, Box<dyn Error + Send + Sync>> {
        let url = format!("{}/projects/{}/queries/{}", self.base_url, self.billing_project, job.job_id);
        let mut params: Vec<(&str, String)> = vec![("timeoutMs", QUERY_TIMEOUT_MS.to_string())];
        if let Some(location) = &job.location {
            params.push(("location", location.clone()));
        }
        if let Some(token) = page_token {
            params.push(("pageToken", token.to_string()));
        }

        let resp = self.http
            .get(&url)
            .header(AUTHORIZATION, self.bearer().await?)
            .query(&params)
            .send().await?
            .error_for_status()?
            .json::<QueryResponse>().await?;
        Ok(resp)
    }
}

#[async_trait]
impl ConversationTable for BigQueryTable {
    async fn append_rows(&self, rows: &[ExportRow]) -> Result<usize, Box<dyn Error + Send + Sync>> {
        if rows.is_empty() {
            return Ok(0);
        }
        let body = InsertAllRequest {
            skip_invalid_rows: false,
            ignore_unknown_values: false,
            rows: rows.iter().map(|r| InsertRow { json: r }).collect(),
        };

        let resp = self.http
            .post(self.insert_all_url())
            .header(AUTHORIZATION, self.bearer().await?)
            .json(&body)
            .send().await?
            .error_for_status()?
            .json::<InsertAllResponse>().await?;

        if !resp.insert_errors.is_empty() {
            let detail = resp.insert_errors
                .iter()
                .map(|e| format!("row {}: {}", e.index, describe_errors(&e.errors)))
                .collect::<Vec<_>>()
                .join(", ");
            error!("BigQuery rejected rows for {}: {}", self.table, detail);
            return Err(format!("BigQuery insert failed: {}", detail).into());
        }

        debug!("Appended {} rows to {}", rows.len(), self.table);
        Ok(rows.len())
    }

    async fn user_contents(&self) -> Result<Vec<String>, Box<dyn Error + Send + Sync>> {
        let url = format!("{}/projects/{}/queries", self.base_url, self.billing_project);
        let request = QueryRequest {
            query: self.user_contents_sql(),
            use_legacy_sql: false,
            timeout_ms: QUERY_TIMEOUT_MS,
        };

        let mut resp = self.http
            .post(&url)
            .header(AUTHORIZATION, self.bearer().await?)
            .json(&request)
            .send().await?
            .error_for_status()?
            .json::<QueryResponse>().await?;

        let mut contents = Vec::new();
        let mut polls = 0;
        loop {
            if !resp.errors.is_empty() {
                return Err(format!("BigQuery query failed: {}", describe_errors(&resp.errors)).into());
            }
            let job = resp.job_reference
                .clone()
                .ok_or_else(|| "BigQuery response is missing a job reference".to_string())?;

            if !resp.job_complete {
                polls += 1;
                if polls > MAX_QUERY_POLLS {
                    return Err(format!("BigQuery job {} did not complete", job.job_id).into());
                }
                debug!("BigQuery job {} still running, polling", job.job_id);
                resp = self.get_query_results(&job, None).await?;
                continue;
            }

            contents.extend(first_column_strings(std::mem::take(&mut resp.rows)));
            match resp.page_token.take() {
                Some(token) => {
                    resp = self.get_query_results(&job, Some(&token)).await?;
                }
                None => {
                    break;
                }
            }
        }

        info!("Read {} historical user messages from {}", contents.len(), self.table);
        Ok(contents)
    }

    fn describe(&self) -> String {
        format!("BigQuery table {}", self.table)
    }
}
