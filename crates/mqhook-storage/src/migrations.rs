// SPDX-FileCopyrightText: 2026 Mqhook Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Embedded schema migrations, applied when a [`Database`](crate::Database) opens.

use mqhook_core::MqhookError;

mod embedded {
    use refinery::embed_migrations;
    embed_migrations!("migrations");
}

/// Applies pending migrations. History lives in `refinery_schema_history`.
pub fn run_migrations(conn: &mut rusqlite::Connection) -> Result<(), MqhookError> {
    embedded::migrations::runner()
        .run(conn)
        .map_err(MqhookError::storage)?;
    Ok(())
}
