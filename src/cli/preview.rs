use anyhow::Result;
use chrono::{DateTime, Local, Utc};

use super::{InvokeArgs, ScheduleArgs};
use crate::core::config::AppConfig;
use crate::core::llm::registry::ProviderRegistry;
use crate::core::llm::{InvokeRequest, LlmGateway, ReplyOrigin};
use crate::core::scheduler::compiler::{self, ScheduleZone, TriggerRule};
use crate::core::terminal;

/// Next `count` firings of `rule` strictly after `from`.
pub(crate) fn upcoming(
    rule: &TriggerRule,
    from: DateTime<Utc>,
    zone: ScheduleZone,
    count: usize,
) -> Vec<DateTime<Utc>> {
    let mut fires = Vec::with_capacity(count);
    let mut cursor = from;
    while fires.len() < count {
        let Some(next) = rule.next_after(cursor, zone) else {
            break;
        };
        fires.push(next);
        cursor = next;
    }
    fires
}

fn render(when: DateTime<Utc>, zone: ScheduleZone) -> String {
    match zone {
        ScheduleZone::Utc => when.format("%a %Y-%m-%d %H:%M UTC").to_string(),
        ScheduleZone::Local => when
            .with_timezone(&Local)
            .format("%a %Y-%m-%d %H:%M %:z")
            .to_string(),
    }
}

pub fn preview_schedule(args: &ScheduleArgs) -> Result<()> {
    let rule = compiler::compile(args.schedule_type, &args.schedule_time, args.schedule_day)?;
    terminal::print_step(&format!("{} ({:?} time)", rule, args.zone));

    let fires = upcoming(&rule, Utc::now(), args.zone, args.count);
    if fires.is_empty() {
        terminal::print_warn("This schedule never fires.");
        return Ok(());
    }
    for (i, when) in fires.into_iter().enumerate() {
        terminal::print_fire_time(i + 1, &render(when, args.zone));
    }
    Ok(())
}

pub async fn invoke_once(args: InvokeArgs) -> Result<()> {
    let config = AppConfig::load(args.config.as_deref()).await?;
    let registry = ProviderRegistry::builtin()?;
    let gateway = LlmGateway::from_config(&config.gateway, &registry);
    if let Some((provider, model)) = gateway.describe() {
        terminal::print_status("Provider", &format!("{} ({})", provider, model));
    }

    let request = InvokeRequest {
        prompt: args.prompt,
        tools: args.tools,
        ..InvokeRequest::default()
    };
    let reply = gateway.invoke(&request).await;
    match &reply.origin {
        ReplyOrigin::Provider => {}
        ReplyOrigin::Unconfigured => {
            terminal::print_info("No LLM provider configured, showing the placeholder reply.")
        }
        ReplyOrigin::Fallback { error } => {
            terminal::print_warn(&format!("Provider failed ({}), showing the placeholder reply.", error))
        }
    }
    println!("\n{}\n", reply.response);
    Ok(())
}
