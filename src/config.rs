use serde::Deserialize;

/// How the prediction oracle is reached.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub enum PredictionMode {
    /// `POST {url}/predict` with the lead as JSON.
    Http { url: String },
    /// Spawn a program, lead JSON on stdin, scores on stdout.
    Command { program: String, args: Vec<String> },
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub db_max_connections: u32,
    pub run_migrations: bool,
    pub prediction: PredictionMode,
    pub prediction_timeout_secs: u64,
    pub recommendation_limit: usize,
    pub phone_region: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self::from_lookup(|key| std::env::var(key).ok())?;

        // Log successful configuration load (without sensitive values)
        tracing::info!("Configuration loaded successfully");
        tracing::debug!(
            "Database URL: {}...",
            config.database_url.chars().take(20).collect::<String>()
        );
        match &config.prediction {
            PredictionMode::Http { url } => tracing::debug!("Prediction service: {}", url),
            PredictionMode::Command { program, .. } => {
                tracing::debug!("Prediction command: {}", program)
            }
        }
        tracing::debug!("Server Port: {}", config.port);

        Ok(config)
    }

    /// Builds the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let database_url = var("DATABASE_URL")
            .or_else(|| var("DB_URL"))
            .ok_or_else(|| anyhow::anyhow!("DATABASE_URL or DB_URL environment variable required"))
            .and_then(|url| {
                if !url.starts_with("postgresql://") && !url.starts_with("postgres://") {
                    anyhow::bail!("DATABASE_URL must start with postgresql:// or postgres://");
                }
                Ok(url)
            })?;

        let port = var("PORT")
            .unwrap_or_else(|| "8080".to_string())
            .parse()
            .map_err(|_| anyhow::anyhow!("PORT must be a valid number between 1-65535"))?;

        let db_max_connections = var("DB_MAX_CONNECTIONS")
            .unwrap_or_else(|| "10".to_string())
            .parse::<u32>()
            .ok()
            .filter(|n| *n > 0)
            .ok_or_else(|| anyhow::anyhow!("DB_MAX_CONNECTIONS must be a positive number"))?;

        let run_migrations = match var("RUN_MIGRATIONS").as_deref().map(str::to_ascii_lowercase) {
            None => true,
            Some(v) if matches!(v.as_str(), "1" | "true" | "yes") => true,
            Some(v) if matches!(v.as_str(), "0" | "false" | "no") => false,
            Some(v) => anyhow::bail!("RUN_MIGRATIONS must be true or false, got '{}'", v),
        };

        let mode = var("PREDICTION_MODE").unwrap_or_else(|| "http".to_string());
        let prediction = match mode.to_ascii_lowercase().as_str() {
            "http" => {
                let url = var("PREDICTION_URL")
                    .ok_or_else(|| {
                        anyhow::anyhow!("PREDICTION_URL is required when PREDICTION_MODE=http")
                    })
                    .and_then(|url| {
                        if !url.starts_with("http://") && !url.starts_with("https://") {
                            anyhow::bail!("PREDICTION_URL must start with http:// or https://");
                        }
                        Ok(url.trim_end_matches('/').to_string())
                    })?;
                PredictionMode::Http { url }
            }
            "command" => {
                let command = var("PREDICTION_COMMAND").ok_or_else(|| {
                    anyhow::anyhow!("PREDICTION_COMMAND is required when PREDICTION_MODE=command")
                })?;
                let mut parts = command.split_whitespace().map(str::to_string);
                let program = parts
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("PREDICTION_COMMAND cannot be empty"))?;
                PredictionMode::Command {
                    program,
                    args: parts.collect(),
                }
            }
            other => anyhow::bail!("PREDICTION_MODE must be http or command, got '{}'", other),
        };

        let prediction_timeout_secs = var("PREDICTION_TIMEOUT_SECS")
            .unwrap_or_else(|| "30".to_string())
            .parse::<u64>()
            .ok()
            .filter(|n| *n > 0)
            .ok_or_else(|| anyhow::anyhow!("PREDICTION_TIMEOUT_SECS must be a positive number"))?;

        let recommendation_limit = var("RECOMMENDATION_LIMIT")
            .unwrap_or_else(|| "3".to_string())
            .parse::<usize>()
            .ok()
            .filter(|n| *n > 0)
            .ok_or_else(|| anyhow::anyhow!("RECOMMENDATION_LIMIT must be a positive number"))?;

        let phone_region = var("PHONE_REGION")
            .unwrap_or_else(|| "ID".to_string())
            .to_ascii_uppercase();
        if phone_region.parse::<phonenumber::country::Id>().is_err() {
            anyhow::bail!("PHONE_REGION '{}' is not a known region code", phone_region);
        }

        Ok(Self {
            database_url,
            port,
            db_max_connections,
            run_migrations,
            prediction,
            prediction_timeout_secs,
            recommendation_limit,
            phone_region,
        })
    }
}
