// Copyright (C) 2025 Michael Herstine <sp1ff@pobox.com>
//
// This file is part of conduit.
//
// conduit is free software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, either version 3 of the
// License, or (at your option) any later version.
//
// conduit is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without
// even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU
// General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with conduit.  If not,
// see <http://www.gnu.org/licenses/>.

//! # conduitd
//!
//! The conduit server: the article API over DynamoDB (or, with `--memory`, over an in-process
//! store-- handy for development & demos, since it needs no backing services at all).
//!
//! The DynamoDB backend is addressed either by AWS region or by explicit endpoint URL (a local
//! DynamoDB, or a ScyllaDB/Alternator node); `--create-tables` provisions the article & user
//! tables on startup for such development setups.

use std::{net::SocketAddr, sync::Arc};

use axum::{routing::get, Router};
use clap::{crate_authors, crate_version, value_parser, Arg, ArgAction, Command};
use either::Either;
use secrecy::SecretString;
use snafu::{prelude::*, Backtrace};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{filter::EnvFilter, fmt, layer::SubscriberExt, Registry};
use url::Url;

use conduit::{
    articles::make_router,
    dynamodb::{self, Location},
    entities::Username,
    http::Conduit,
    identity::{Provider, UserRecord},
    memory,
    repository::Articles,
    schemas,
    storage::Backend,
};

#[derive(Debug, Snafu)]
enum Error {
    #[snafu(display("Failed to bind {address}: {source}"))]
    Bind {
        address: SocketAddr,
        source: std::io::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("Credentials must be given as ACCESS-KEY-ID,SECRET-ACCESS-KEY"))]
    Credentials { backtrace: Backtrace },
    #[snafu(display("While creating the DynamoDB client, {source}"))]
    Client { source: dynamodb::Error },
    #[snafu(display("Failed to create tables: {source}"))]
    CreateTables { source: schemas::Error },
    #[snafu(display("Failed to parse RUST_LOG: {source}"))]
    Filter {
        source: tracing_subscriber::filter::ParseError,
    },
    #[snafu(display("Failed while serving: {source}"))]
    Serve {
        source: std::io::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("Failed to set the global tracing subscriber: {source}"))]
    SetGlobalDefault {
        source: tracing::subscriber::SetGlobalDefaultError,
    },
    #[snafu(display("Users must be given as USERNAME,TOKEN; got {text}"))]
    User { text: String, backtrace: Backtrace },
    #[snafu(display("{name} is not a valid username: {source}"))]
    UserName {
        name: String,
        source: conduit::entities::Error,
    },
}

type Result<T> = std::result::Result<T, Error>;

fn make_command() -> Command {
    Command::new("conduitd")
        .version(crate_version!())
        .author(crate_authors!())
        .about("The conduit blogging-platform API server")
        .arg(
            Arg::new("address")
                .short('a')
                .long("address")
                .value_parser(value_parser!(SocketAddr))
                .default_value("0.0.0.0:8080")
                .help("Address & port on which to listen"),
        )
        .arg(
            Arg::new("region")
                .short('r')
                .long("region")
                .conflicts_with_all(["endpoint", "memory"])
                .help("AWS region hosting the DynamoDB tables"),
        )
        .arg(
            Arg::new("endpoint")
                .short('e')
                .long("endpoint")
                .action(ArgAction::Append)
                .value_parser(value_parser!(Url))
                .conflicts_with("memory")
                .help("Explicit DynamoDB endpoint URL (local DynamoDB or Alternator); may be repeated"),
        )
        .arg(
            Arg::new("credentials")
                .short('c')
                .long("credentials")
                .conflicts_with("memory")
                .help("AWS credentials, given as ACCESS-KEY-ID,SECRET-ACCESS-KEY"),
        )
        .arg(
            Arg::new("create-tables")
                .long("create-tables")
                .action(ArgAction::SetTrue)
                .conflicts_with("memory")
                .help("Provision the article & user tables on startup"),
        )
        .arg(
            Arg::new("memory")
                .short('M')
                .long("memory")
                .action(ArgAction::SetTrue)
                .help("Serve from an in-process store (development only; nothing is persisted)"),
        )
        .arg(
            Arg::new("user")
                .short('u')
                .long("user")
                .action(ArgAction::Append)
                .requires("memory")
                .help("Seed the in-process store with a user, given as USERNAME,TOKEN; may be repeated"),
        )
}

/// Split a "LEFT,RIGHT" pair argument
fn split_pair(text: &str) -> Option<(&str, &str)> {
    let (left, right) = text.split_once(',')?;
    (!left.is_empty() && !right.is_empty()).then_some((left, right))
}

/// Build the store adapter & identity provider per the command line
async fn make_adapters(
    matches: &clap::ArgMatches,
) -> Result<(
    Arc<dyn Backend + Send + Sync>,
    Arc<dyn Provider + Send + Sync>,
)> {
    if matches.get_flag("memory") {
        let store = Arc::new(memory::Store::new());
        if let Some(users) = matches.get_many::<String>("user") {
            for text in users {
                let (name, token) = split_pair(text).context(UserSnafu { text: text.clone() })?;
                store.add_user(UserRecord {
                    username: Username::new(name).context(UserNameSnafu {
                        name: name.to_string(),
                    })?,
                    bio: String::new(),
                    image: String::new(),
                    token: token.to_string(),
                    following: vec![],
                });
                info!("seeded user {}", name);
            }
        }
        return Ok((store.clone(), store));
    }

    let location: Location = match matches
        .get_many::<Url>("endpoint")
        .map(|urls| urls.cloned().collect::<Vec<Url>>())
    {
        Some(endpoints) => Either::Right(endpoints),
        None => Either::Left(
            matches
                .get_one::<String>("region")
                .cloned()
                .unwrap_or("us-west-2".to_string()),
        ),
    };
    let credentials = matches
        .get_one::<String>("credentials")
        .map(|text| {
            split_pair(text)
                .map(|(id, secret)| {
                    (
                        SecretString::from(id.to_string()),
                        SecretString::from(secret.to_string()),
                    )
                })
                .context(CredentialsSnafu)
        })
        .transpose()?;

    let client = Arc::new(
        dynamodb::Client::new(&location, &credentials)
            .await
            .context(ClientSnafu)?,
    );
    if matches.get_flag("create-tables") {
        schemas::create_tables(client.raw())
            .await
            .context(CreateTablesSnafu)?;
    }
    Ok((client.clone(), client))
}

async fn shutdown_signal() {
    // If we can't even install the handler, running on without graceful shutdown is the best we
    // can do
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to install the Ctrl-C handler: {}", err);
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}

async fn run() -> Result<()> {
    let matches = make_command().get_matches();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .context(FilterSnafu)?;
    let subscriber = Registry::default().with(filter).with(fmt::layer());
    tracing::subscriber::set_global_default(subscriber).context(SetGlobalDefaultSnafu)?;

    let (storage, identity) = make_adapters(&matches).await?;
    let state = Arc::new(Conduit {
        articles: Articles::new(storage),
        identity,
    });

    let router = Router::new()
        .route("/healthz", get(|| async { "OK" }))
        .nest("/api", make_router(state))
        .layer(TraceLayer::new_for_http());

    let address = *matches
        .get_one::<SocketAddr>("address")
        .unwrap(/* has a default */);
    let listener = TcpListener::bind(address)
        .await
        .context(BindSnafu { address })?;
    info!("conduitd listening on {}", address);
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context(ServeSnafu)
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    match run().await {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{}", err);
            std::process::ExitCode::FAILURE
        }
    }
}
