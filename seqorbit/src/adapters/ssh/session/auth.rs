// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use anyhow::{Context, Result};
use russh::client::{AuthResult, Handle, KeyboardInteractiveAuthResponse};

use crate::adapters::ssh::AuthenticationFailure;

use super::{ClientHandler, SshParams};

/// Servers that keep asking after this many rounds want something other than
/// the password (an OTP, for instance).
const MAX_INTERACTIVE_ROUNDS: usize = 4;

enum AuthDecision {
    Success,
    KeyboardInteractive,
    Failure,
}

fn auth_decision(result: AuthResult) -> AuthDecision {
    match result {
        AuthResult::Success => AuthDecision::Success,
        AuthResult::Failure {
            remaining_methods, ..
        } if remaining_methods.contains(&russh::MethodKind::KeyboardInteractive) => {
            AuthDecision::KeyboardInteractive
        }
        AuthResult::Failure { .. } => AuthDecision::Failure,
    }
}

/// Password first; keyboard-interactive with the same secret when the server
/// only offers that.
pub(super) async fn authenticate(
    handle: &mut Handle<ClientHandler>,
    params: &SshParams,
) -> Result<()> {
    let result = handle
        .authenticate_password(params.username.clone(), params.secret.clone())
        .await
        .context("password authentication")?;
    match auth_decision(result) {
        AuthDecision::Success => {
            log::info!("password authentication accepted for {}", params.username);
            Ok(())
        }
        AuthDecision::KeyboardInteractive => {
            log::debug!("password rejected, trying keyboard-interactive");
            keyboard_interactive(handle, params).await
        }
        AuthDecision::Failure => Err(AuthenticationFailure.into()),
    }
}

async fn keyboard_interactive(
    handle: &mut Handle<ClientHandler>,
    params: &SshParams,
) -> Result<()> {
    let mut response = handle
        .authenticate_keyboard_interactive_start(params.username.clone(), None::<String>)
        .await
        .context("keyboard-interactive start")?;

    for _ in 0..MAX_INTERACTIVE_ROUNDS {
        match response {
            KeyboardInteractiveAuthResponse::Success => return Ok(()),
            KeyboardInteractiveAuthResponse::Failure {
                remaining_methods,
                partial_success,
            } => {
                log::debug!(
                    "authentication failed (partial_success={}, remaining={:?})",
                    partial_success,
                    remaining_methods
                );
                return Err(AuthenticationFailure.into());
            }
            KeyboardInteractiveAuthResponse::InfoRequest { prompts, .. } => {
                log::debug!("answering {} keyboard-interactive prompt(s)", prompts.len());
                let answers = interactive_answers(prompts.len(), &params.secret);
                response = handle
                    .authenticate_keyboard_interactive_respond(answers)
                    .await
                    .context("keyboard-interactive respond")?;
            }
        }
    }
    log::warn!("keyboard-interactive did not settle after {MAX_INTERACTIVE_ROUNDS} rounds");
    Err(AuthenticationFailure.into())
}

/// Every prompt gets the secret; an empty request is acknowledged with no
/// answers.
fn interactive_answers(prompts: usize, secret: &str) -> Vec<String> {
    vec![secret.to_string(); prompts]
}
