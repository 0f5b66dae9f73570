use super::dispatcher::ChangeEvent;
use super::mailer::OutgoingMail;
use crate::db::entities::email_configs;
use chrono::Local;

/// Mail sent to one recipient when a task's content changed
pub fn change_mail(event: &ChangeEvent, receiver: &str) -> OutgoingMail {
    let title = event
        .title
        .as_deref()
        .filter(|t| !t.trim().is_empty())
        .unwrap_or(&event.task.name);

    let body = format!(
        "The monitored page has been updated.\n\
         \n\
         Task: {task}\n\
         Page title: {title}\n\
         URL: {url}\n\
         Checked at: {time}\n\
         \n\
         --- Previous content ---\n\
         {old}\n\
         \n\
         --- New content ---\n\
         {new}\n",
        task = event.task.name,
        title = title,
        url = event.task.url,
        time = event.check_time.format("%Y-%m-%d %H:%M:%S"),
        old = event.old_content.as_deref().unwrap_or("(none)"),
        new = event.new_content,
    );

    OutgoingMail {
        to: receiver.to_string(),
        subject: format!("{} - content update", title),
        body,
    }
}

/// Mail sent by the "test configuration" action
pub fn test_mail(config: &email_configs::Model) -> OutgoingMail {
    OutgoingMail {
        to: config.receiver_email.clone(),
        subject: "WebMonitor - test mail".to_string(),
        body: format!(
            "This is a test mail for the configuration \"{}\".\n\
             SMTP server: {}:{}\n\
             Sent at: {}\n",
            config.name,
            config.smtp_server,
            config.smtp_port,
            Local::now().format("%Y-%m-%d %H:%M:%S"),
        ),
    }
}
