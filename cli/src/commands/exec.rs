use std::collections::HashMap;
use std::io::Write;

use anyhow::Result;
use tokio::sync::broadcast::error::RecvError;

use toolrun_core::api::{
    AuthDecision, CallFrame, Client, PromptAnswer, PromptFrame, Run, RunEvent, RunOptions,
    RunState, Tool,
};

use super::cli::{EvalArgs, ExecArgs, RunArgs};
use crate::stdio::Prompter;

pub const EXIT_OK: i32 = 0;
pub const EXIT_ERROR: i32 = 1;
pub const EXIT_ABORTED: i32 = 130;

fn options(args: &ExecArgs) -> RunOptions {
    let mut opts = RunOptions::new()
        .confirm(args.confirm)
        .disable_cache(args.disable_cache)
        .prompt(true);
    if let Some(input) = &args.input {
        opts = opts.input(input);
    }
    if let Some(ws) = &args.workspace {
        opts = opts.workspace(ws);
    }
    for entry in &args.env {
        opts = opts.env(entry);
    }
    opts
}

pub async fn run_file(client: &Client, args: &RunArgs) -> Result<i32> {
    let mut opts = options(&args.exec);
    if let Some(sub) = &args.sub_tool {
        opts = opts.sub_tool(sub);
    }
    let run = client.run(&args.file, opts)?;
    drive(client, run, args.exec.chat).await
}

pub async fn eval(client: &Client, args: &EvalArgs) -> Result<i32> {
    let mut tool = Tool::new(&args.instructions)
        .with_tools(args.tools.iter().cloned())
        .chat(args.exec.chat);
    if let Some(model) = &args.model {
        tool = tool.with_model(model);
    }
    let run = client.evaluate(tool, options(&args.exec))?;
    drive(client, run, args.exec.chat).await
}

/// Prints only what a cumulative call output adds since last time.
#[derive(Default)]
struct ProgressPrinter {
    printed: HashMap<String, String>,
    root: Option<String>,
}

impl ProgressPrinter {
    fn delta(&mut self, call: &CallFrame) -> Option<String> {
        if call.parent_id.is_some() {
            return None;
        }
        let root = self.root.get_or_insert_with(|| call.id.clone());
        if root != &call.id {
            return None;
        }
        let content = call.content();
        let prev = self.printed.entry(call.id.clone()).or_default();
        let delta = match content.strip_prefix(prev.as_str()) {
            Some(rest) => rest.to_string(),
            // Rewritten rather than extended: start a fresh line.
            None => format!("\n{content}"),
        };
        *prev = content;
        (!delta.is_empty()).then_some(delta)
    }

    fn streamed(&self) -> &str {
        self.root
            .as_ref()
            .and_then(|r| self.printed.get(r))
            .map(String::as_str)
            .unwrap_or_default()
    }
}

async fn drive(client: &Client, mut run: Run, chat: bool) -> Result<i32> {
    let mut prompter = Prompter::default();
    loop {
        let text = turn(client, &run, &mut prompter).await?;

        match run.state() {
            RunState::Aborted => {
                eprintln!("aborted");
                return Ok(EXIT_ABORTED);
            }
            RunState::Error => {
                eprintln!("error: {}", run.err());
                return Ok(EXIT_ERROR);
            }
            RunState::Continue if chat => {
                let Some(line) = prompter.ask("> ").await? else {
                    return Ok(EXIT_OK);
                };
                if line.trim().is_empty() {
                    return Ok(EXIT_OK);
                }
                run = run.next_chat(line)?;
            }
            _ => {
                tracing::debug!(target: "toolrun.cli", bytes = text.len(), "run complete");
                return Ok(EXIT_OK);
            }
        }
    }
}

/// Streams one turn to stdout, answering confirmations and prompts on the way.
async fn turn(client: &Client, run: &Run, prompter: &mut Prompter) -> Result<String> {
    let mut events = run.subscribe();
    let mut printer = ProgressPrinter::default();
    let mut out = std::io::stdout();

    let text = run.text();
    tokio::pin!(text);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut interrupted = false;

    let result = loop {
        tokio::select! {
            res = &mut text => break res,
            _ = &mut ctrl_c, if !interrupted => {
                interrupted = true;
                eprintln!();
                run.close();
            }
            ev = events.recv() => match ev {
                Ok(RunEvent::CallProgress(call)) => {
                    if let Some(delta) = printer.delta(&call) {
                        write!(out, "{delta}")?;
                        out.flush()?;
                    }
                }
                Ok(RunEvent::CallConfirm(call)) => confirm(client, &call, prompter).await?,
                Ok(RunEvent::Prompt(prompt)) => answer(client, &prompt, prompter).await?,
                Err(RecvError::Lagged(n)) => {
                    tracing::warn!(target: "toolrun.cli", skipped = n, "display fell behind run events");
                }
                Err(RecvError::Closed) => {}
            },
        }
    };

    let text = match result {
        Ok(text) => text,
        Err(_) => return Ok(String::new()),
    };
    // The final text may extend what was streamed, or replace it.
    let streamed = printer.streamed();
    match text.strip_prefix(streamed) {
        Some(rest) => write!(out, "{rest}")?,
        None => write!(out, "\n{text}")?,
    }
    if !text.is_empty() {
        writeln!(out)?;
    }
    out.flush()?;
    Ok(text)
}

async fn confirm(client: &Client, call: &CallFrame, prompter: &mut Prompter) -> Result<()> {
    let action = call.input.as_deref().unwrap_or("(no details)");
    let tool = call.tool_name.as_deref().unwrap_or("tool");
    eprintln!();
    let decision = if prompter.ask_yes_no(&format!("{tool} wants to run: {action}\nAllow?")).await? {
        AuthDecision::accept(&call.id)
    } else {
        AuthDecision::deny(&call.id, "denied by user")
    };
    if let Err(e) = client.confirm(decision).await {
        tracing::warn!(target: "toolrun.cli", id = %call.id, error = %e, "confirmation not delivered");
    }
    Ok(())
}

async fn answer(client: &Client, prompt: &PromptFrame, prompter: &mut Prompter) -> Result<()> {
    eprintln!();
    if !prompt.message.is_empty() {
        eprintln!("{}", prompt.message);
    }
    let mut responses = Vec::with_capacity(prompt.fields.len());
    for field in &prompt.fields {
        let question = format!("{field}: ");
        let value = if prompt.sensitive {
            prompter.ask_hidden(&question).await?
        } else {
            prompter.ask(&question).await?
        };
        let value = value.unwrap_or_default();
        responses.push((field.clone(), value));
    }
    if let Err(e) = client
        .prompt_response(PromptAnswer::new(&prompt.id, responses))
        .await
    {
        tracing::warn!(target: "toolrun.cli", id = %prompt.id, error = %e, "prompt answer not delivered");
    }
    Ok(())
}
