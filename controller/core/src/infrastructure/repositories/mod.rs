// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod memory;
pub mod postgres_agent;
pub mod postgres_config;
pub mod postgres_run;
pub mod postgres_update;

pub use memory::{
    InMemoryAgentRepository, InMemoryApiKeyRepository, InMemoryConfigRepository,
    InMemoryGroupRepository, InMemoryRunRepository, InMemoryUpdateRepository,
};
pub use postgres_agent::{PostgresAgentRepository, PostgresGroupRepository};
pub use postgres_config::PostgresConfigRepository;
pub use postgres_run::PostgresRunRepository;
pub use postgres_update::{PostgresApiKeyRepository, PostgresUpdateRepository};
