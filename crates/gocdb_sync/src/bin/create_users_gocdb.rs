// Copyright 2021-2024 SecureDNA Stiftung (SecureDNA Foundation) <licensing@securedna.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

use gocdb_sync::cli::{self, Tool};

#[tokio::main]
async fn main() -> ! {
    cli::main(Tool::Gocdb).await
}
