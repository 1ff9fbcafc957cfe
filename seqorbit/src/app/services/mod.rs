// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

pub mod random;
pub mod report;
pub mod script;
pub mod shell;
pub mod slurm;
pub mod validation;
