//! Prompt Assembler (C7): pure functions from `(role, task, session_token,
//! feedback, allow_list, guidance)` to the text sent to the agent. No
//! hidden state — identical inputs always produce identical output.

use crate::session::SessionToken;
use crate::signal::SignalKind;
use crate::tasklist::Task;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentRole {
    Implementation,
    TestWriting,
    Review,
    Fix,
}

impl AgentRole {
    pub fn required_signal(&self) -> SignalKind {
        match self {
            AgentRole::Implementation => SignalKind::TaskDone,
            AgentRole::TestWriting => SignalKind::TestsDone,
            AgentRole::Review => SignalKind::ReviewApproved,
            AgentRole::Fix => SignalKind::FixDone,
        }
    }
}

/// Details of a failing fatal gate, embedded verbatim in a FIX prompt.
#[derive(Debug, Clone)]
pub struct GateFailureContext<'a> {
    pub gate_name: &'a str,
    pub argv: &'a [String],
    pub output_tail: &'a str,
}

fn task_block(task: &Task) -> String {
    let criteria = task
        .acceptance_criteria
        .iter()
        .map(|c| format!("- {c}"))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "Task {id}: {title}\n\n{description}\n\nAcceptance criteria:\n{criteria}",
        id = task.id,
        title = task.title,
        description = task.description,
    )
}

fn token_block(token: &SessionToken, signal: SignalKind) -> String {
    format!(
        "Your active session token is: {token}\n\
         When you are finished, you MUST emit exactly one completion signal of the form\n\
         <{tag} session=\"{token}\">your summary here</{tag}>\n\
         The session attribute must match the token above character-for-character.",
        tag = signal.tag(),
    )
}

fn feedback_block(feedback: Option<&str>) -> String {
    match feedback {
        Some(text) if !text.is_empty() => format!("\nFeedback from the previous attempt:\n{text}\n"),
        _ => String::new(),
    }
}

/// Assemble the implementation-phase prompt.
pub fn implementation_prompt(task: &Task, token: &SessionToken, feedback: Option<&str>) -> String {
    format!(
        "You are implementing a task. You may create or modify any file needed.\n\n\
         {task}\n{feedback}\n{token_block}",
        task = task_block(task),
        feedback = feedback_block(feedback),
        token_block = token_block(token, SignalKind::TaskDone),
    )
}

/// Assemble the test-writing-phase prompt, warning about the allow-list.
pub fn test_writing_prompt(
    task: &Task,
    token: &SessionToken,
    feedback: Option<&str>,
    allow_list_globs: &[String],
) -> String {
    format!(
        "You are writing tests for a completed implementation. You may only add or modify files \
         matching these patterns; anything else you write will be reverted:\n{globs}\n\n\
         {task}\n{feedback}\n{token_block}",
        globs = allow_list_globs.iter().map(|g| format!("- {g}")).collect::<Vec<_>>().join("\n"),
        task = task_block(task),
        feedback = feedback_block(feedback),
        token_block = token_block(token, SignalKind::TestsDone),
    )
}

/// Assemble the review-phase prompt. Read-only: the agent is not asked to
/// write anything, only to approve or reject.
pub fn review_prompt(task: &Task, token: &SessionToken, guidance: Option<&str>) -> String {
    format!(
        "You are reviewing a completed implementation and its tests. Do not modify any files.\n\
         Respond with <review-approved session=\"{token}\">...</review-approved> if the work \
         satisfies the acceptance criteria, or <review-rejected session=\"{token}\">reason</review-rejected> \
         if it does not.\n\n\
         {task}{guidance}",
        guidance = guidance.map(|g| format!("\n\nReviewer guidance:\n{g}")).unwrap_or_default(),
        task = task_block(task),
    )
}

/// Assemble a fix prompt scoped to one failing fatal gate.
pub fn fix_prompt(task: &Task, token: &SessionToken, failure: &GateFailureContext<'_>) -> String {
    format!(
        "The gate '{gate}' failed and must be fixed before this task can proceed.\n\
         Command: {argv}\n\
         Output:\n{output}\n\n\
         {task}\n{token_block}",
        gate = failure.gate_name,
        argv = failure.argv.join(" "),
        output = failure.output_tail,
        task = task_block(task),
        token_block = token_block(token, SignalKind::FixDone),
    )
}
