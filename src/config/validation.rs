use crate::config::types::{
    BatchConfig, Config, CrawlerConfig, OutputConfig, QueueConfig, UserAgentConfig, WorkerConfig,
};
use crate::ConfigError;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_crawler_config(&config.crawler)?;
    validate_user_agent_config(&config.user_agent)?;
    validate_queue_config(&config.queue)?;
    validate_batch_config(&config.batch)?;
    validate_worker_config(&config.workers)?;
    validate_output_config(&config.output)?;
    Ok(())
}

/// Validates crawl frontier and politeness settings
fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    if !(0.0..=1.0).contains(&config.min_score) {
        return Err(ConfigError::Validation(format!(
            "min_score must be between 0.0 and 1.0, got {}",
            config.min_score
        )));
    }

    if config.max_links_per_page < 1 {
        return Err(ConfigError::Validation(
            "max_links_per_page must be >= 1".to_string(),
        ));
    }

    if !config.requests_per_second.is_finite() || config.requests_per_second <= 0.0 {
        return Err(ConfigError::Validation(format!(
            "requests_per_second must be > 0, got {}",
            config.requests_per_second
        )));
    }

    Ok(())
}

/// Validates user agent configuration
fn validate_user_agent_config(config: &UserAgentConfig) -> Result<(), ConfigError> {
    if config.crawler_name.is_empty() {
        return Err(ConfigError::Validation(
            "crawler_name cannot be empty".to_string(),
        ));
    }

    if !config
        .crawler_name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-')
    {
        return Err(ConfigError::Validation(format!(
            "crawler_name must contain only alphanumeric characters and hyphens, got '{}'",
            config.crawler_name
        )));
    }

    Url::parse(&config.contact_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid contact_url: {}", e)))?;

    validate_email(&config.contact_email)?;

    Ok(())
}

fn validate_queue_config(config: &QueueConfig) -> Result<(), ConfigError> {
    if config.max_attempts < 1 {
        return Err(ConfigError::Validation(
            "max_attempts must be >= 1".to_string(),
        ));
    }

    if config.lease_ms < 100 {
        return Err(ConfigError::Validation(format!(
            "lease_ms must be >= 100ms, got {}ms",
            config.lease_ms
        )));
    }

    if config.backoff_max_ms < config.backoff_base_ms {
        return Err(ConfigError::Validation(format!(
            "backoff_max_ms ({}) must be >= backoff_base_ms ({})",
            config.backoff_max_ms, config.backoff_base_ms
        )));
    }

    if config.poll_interval_ms < 1 {
        return Err(ConfigError::Validation(
            "poll_interval_ms must be >= 1".to_string(),
        ));
    }

    Ok(())
}

fn validate_batch_config(config: &BatchConfig) -> Result<(), ConfigError> {
    if config.max_batch_size < 1 {
        return Err(ConfigError::Validation(
            "max_batch_size must be >= 1".to_string(),
        ));
    }

    if config.initial_size < 1 || config.initial_size > config.max_batch_size {
        return Err(ConfigError::Validation(format!(
            "initial_size must be between 1 and max_batch_size ({}), got {}",
            config.max_batch_size, config.initial_size
        )));
    }

    if !(0.0..=1.0).contains(&config.max_error_rate) {
        return Err(ConfigError::Validation(format!(
            "max_error_rate must be between 0.0 and 1.0, got {}",
            config.max_error_rate
        )));
    }

    Ok(())
}

fn validate_worker_config(config: &WorkerConfig) -> Result<(), ConfigError> {
    if config.concurrency < 1 || config.concurrency > 100 {
        return Err(ConfigError::Validation(format!(
            "concurrency must be between 1 and 100, got {}",
            config.concurrency
        )));
    }

    Ok(())
}

fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database_path cannot be empty".to_string(),
        ));
    }

    Ok(())
}

/// Basic email validation
fn validate_email(email: &str) -> Result<(), ConfigError> {
    let Some((local, domain)) = email.split_once('@') else {
        return Err(ConfigError::Validation(format!(
            "Invalid email format: '{}'",
            email
        )));
    };

    if local.is_empty() || domain.is_empty() || domain.contains('@') {
        return Err(ConfigError::Validation(format!(
            "Invalid email format: '{}'",
            email
        )));
    }

    if !domain.contains('.') {
        return Err(ConfigError::Validation(format!(
            "Invalid email domain: '{}'",
            email
        )));
    }

    Ok(())
}
