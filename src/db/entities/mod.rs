pub mod blacklist_domains;
pub mod email_configs;
pub mod monitor_logs;
pub mod monitor_tasks;
pub mod subscriptions;
pub mod user_quotas;
