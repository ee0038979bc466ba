use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use comfy_table::{presets::UTF8_FULL, Table};
use serde_json::{json, Value};

#[derive(Parser, Debug)]
#[command(name = "lq-admin")]
#[command(about = "Link Queue Admin CLI", long_about = None)]
struct Args {
    /// Queue API base URL
    #[arg(long, default_value = "http://127.0.0.1:8090")]
    api: String,

    /// Bearer secret for the queue API
    #[arg(long, env = "QUEUE_API_SECRET", hide_env_values = true)]
    secret: Option<String>,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = Format::Table)]
    format: Format,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    Table,
    Json,
    Yaml,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List queued requests
    Pending,

    /// Show queue statistics
    Stats,

    /// Check broker health
    Health,

    /// Queue a new linking request
    Enqueue {
        /// Identity of the user to link
        subject_id: String,

        /// Human-readable label for the user
        #[arg(long)]
        label: String,

        /// Channel the request came from
        #[arg(long)]
        channel: String,

        /// Message the request came from
        #[arg(long)]
        message: String,
    },

    /// Report the result of processing a request
    Report {
        /// Request ID
        request_id: String,

        /// The request was linked
        #[arg(long, conflicts_with = "failure", required_unless_present = "failure")]
        success: bool,

        /// The attempt failed
        #[arg(long)]
        failure: bool,

        /// Linked external account
        #[arg(long)]
        account: Option<String>,

        /// Failure reason
        #[arg(long)]
        error: Option<String>,
    },
}

/// Thin client of the queue API
struct ApiClient {
    http: reqwest::Client,
    base: String,
    secret: Option<String>,
}

impl ApiClient {
    fn new(base: &str, secret: Option<String>) -> Self {
        ApiClient {
            http: reqwest::Client::new(),
            base: base.trim_end_matches('/').to_string(),
            secret,
        }
    }

    async fn get(&self, path: &str) -> anyhow::Result<Value> {
        let mut request = self.http.get(format!("{}{}", self.base, path));
        if let Some(secret) = &self.secret {
            request = request.bearer_auth(secret);
        }
        Self::read(request.send().await?).await
    }

    async fn post(&self, path: &str, body: &Value) -> anyhow::Result<Value> {
        let mut request = self.http.post(format!("{}{}", self.base, path)).json(body);
        if let Some(secret) = &self.secret {
            request = request.bearer_auth(secret);
        }
        Self::read(request.send().await?).await
    }

    async fn read(response: reqwest::Response) -> anyhow::Result<Value> {
        let status = response.status();
        let body: Value = response.json().await.context("Broker sent a non-JSON response")?;
        if !status.is_success() {
            let error = body["error"].as_str().unwrap_or("unknown error");
            bail!("Broker returned {}: {}", status, error);
        }
        Ok(body)
    }
}

fn report_body(request_id: &str, success: bool, account: Option<String>, error: Option<String>) -> Value {
    let mut body = json!({ "requestId": request_id, "success": success });
    if let Some(account) = account {
        body["externalAccount"] = json!(account);
    }
    if let Some(error) = error {
        body["errorMessage"] = json!(error);
    }
    body
}

fn enqueue_body(subject_id: &str, label: &str, channel: &str, message: &str) -> Value {
    json!({
        "channelId": channel,
        "messageId": message,
        "subjectId": subject_id,
        "subjectLabel": label,
    })
}

fn format_millis(value: &Value) -> String {
    value
        .as_i64()
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| "-".to_string())
}

fn pending_table(response: &Value) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["ID", "Subject", "Source", "Created", "Retries", "Images"]);
    for request in response["requests"].as_array().into_iter().flatten() {
        table.add_row(vec![
            request["id"].as_str().unwrap_or("").to_string(),
            format!(
                "{} ({})",
                request["subjectLabel"].as_str().unwrap_or(""),
                request["subjectId"].as_str().unwrap_or("")
            ),
            format!(
                "{}/{}",
                request["channelId"].as_str().unwrap_or(""),
                request["messageId"].as_str().unwrap_or("")
            ),
            format_millis(&request["createdAt"]),
            request["retryCount"].as_u64().unwrap_or(0).to_string(),
            request["imageUrls"].as_array().map_or(0, Vec::len).to_string(),
        ]);
    }
    table
}

fn stats_table(response: &Value) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["Metric", "Value"]);
    table.add_row(vec!["Queue Size".to_string(), response["queueSize"].to_string()]);
    table.add_row(vec!["Oldest Request".to_string(), format_millis(&response["oldestRequestTimestamp"])]);
    table.add_row(vec!["Newest Request".to_string(), format_millis(&response["newestRequestTimestamp"])]);
    table
}

fn health_table(response: &Value) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["Property", "Value"]);
    table.add_row(vec![
        "Status".to_string(),
        response["status"].as_str().unwrap_or("unknown").to_string(),
    ]);
    table.add_row(vec!["Queue Size".to_string(), response["queueSize"].to_string()]);
    table.add_row(vec!["Checked At".to_string(), format_millis(&response["timestamp"])]);
    table
}

fn enqueue_table(response: &Value) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["Request ID", "Queue Size"]);
    table.add_row(vec![
        response["requestId"].as_str().unwrap_or("").to_string(),
        response["queueSize"].to_string(),
    ]);
    table
}

fn report_table(response: &Value) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["Action", "Retries", "Message"]);
    table.add_row(vec![
        response["action"].as_str().unwrap_or("").to_string(),
        response["retryCount"].to_string(),
        response["message"].as_str().unwrap_or("").to_string(),
    ]);
    table
}

fn print(format: Format, response: &Value, table: fn(&Value) -> Table) -> anyhow::Result<()> {
    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(response)?),
        Format::Yaml => println!("{}", serde_yaml::to_string(response)?),
        Format::Table => println!("{}", table(response)),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let client = ApiClient::new(&args.api, args.secret);

    match args.command {
        Commands::Pending => {
            let response = client.get("/queue/pending").await?;
            print(args.format, &response, pending_table)?;
        }

        Commands::Stats => {
            let response = client.get("/queue/stats").await?;
            print(args.format, &response, stats_table)?;
        }

        Commands::Health => {
            let response = client.get("/health").await?;
            print(args.format, &response, health_table)?;
        }

        Commands::Enqueue {
            subject_id,
            label,
            channel,
            message,
        } => {
            let body = enqueue_body(&subject_id, &label, &channel, &message);
            let response = client.post("/queue/enqueue", &body).await?;
            print(args.format, &response, enqueue_table)?;
        }

        Commands::Report {
            request_id,
            success,
            failure: _,
            account,
            error,
        } => {
            let body = report_body(&request_id, success, account, error);
            let response = client.post("/queue/result", &body).await?;
            print(args.format, &response, report_table)?;
        }
    }

    Ok(())
}
