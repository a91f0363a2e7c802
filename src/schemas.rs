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

//! # DynamoDB Schema Management
//!
//! Table creation for development & test environments. Production tables are expected to be
//! provisioned out-of-band (CloudFormation, Terraform, whatever); `conduitd --create-tables`
//! drives this module so a local DynamoDB or Alternator node can bootstrap itself.

use aws_sdk_dynamodb::{
    config::http::HttpResponse,
    error::SdkError,
    operation::create_table::CreateTableError,
    types::{
        AttributeDefinition, BillingMode, GlobalSecondaryIndex, KeySchemaElement, KeyType,
        Projection, ProjectionType, ScalarAttributeType,
    },
    Client,
};
use snafu::{Backtrace, ResultExt, Snafu};
use tracing::info;

use crate::dynamodb::{ARTICLES_TABLE, AUTHOR_INDEX, CREATED_INDEX, TOKEN_INDEX, USERS_TABLE};

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                       module Error type                                        //
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Failed to create table: {source}"))]
    CreateTable {
        #[snafu(source(from(SdkError<CreateTableError, HttpResponse>, Box::new)))]
        source: Box<SdkError<CreateTableError, HttpResponse>>,
        backtrace: Backtrace,
    },
    #[snafu(display("Failed to build {name}: {source}"))]
    GenericBuildFailure {
        name: String,
        source: aws_sdk_dynamodb::error::BuildError,
        backtrace: Backtrace,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                             schema                                             //
////////////////////////////////////////////////////////////////////////////////////////////////////

macro_rules! table_attr {
    ($col_name:expr, $ty:ident) => {
        AttributeDefinition::builder()
            .attribute_name($col_name)
            .attribute_type(ScalarAttributeType::$ty)
            .build()
            .context(GenericBuildFailureSnafu {
                name: $col_name.to_string(),
            })?
    };
}

macro_rules! key_elem {
    ($col_name:expr, $key_type:ident) => {
        KeySchemaElement::builder()
            .attribute_name($col_name)
            .key_type(KeyType::$key_type)
            .build()
            .context(GenericBuildFailureSnafu {
                name: $col_name.to_string(),
            })?
    };
}

fn project_all() -> Projection {
    Projection::builder()
        .projection_type(ProjectionType::All)
        .build()
}

/// The article table: `slug` is the primary key; the `created` GSI (constant discriminator
/// partition, `createdAt` range) orders the whole table by creation time; the `author` GSI
/// partitions on `author` with the same range key.
async fn create_articles(client: &Client) -> Result<()> {
    client
        .create_table()
        .table_name(ARTICLES_TABLE)
        .billing_mode(BillingMode::PayPerRequest)
        .set_attribute_definitions(Some(vec![
            table_attr!("slug", S),
            table_attr!("dummy", S),
            table_attr!("createdAt", N),
            table_attr!("author", S),
        ]))
        .set_key_schema(Some(vec![key_elem!("slug", Hash)]))
        .global_secondary_indexes(
            GlobalSecondaryIndex::builder()
                .index_name(CREATED_INDEX)
                .set_key_schema(Some(vec![
                    key_elem!("dummy", Hash),
                    key_elem!("createdAt", Range),
                ]))
                .projection(project_all())
                .build()
                .context(GenericBuildFailureSnafu {
                    name: CREATED_INDEX.to_string(),
                })?,
        )
        .global_secondary_indexes(
            GlobalSecondaryIndex::builder()
                .index_name(AUTHOR_INDEX)
                .set_key_schema(Some(vec![
                    key_elem!("author", Hash),
                    key_elem!("createdAt", Range),
                ]))
                .projection(project_all())
                .build()
                .context(GenericBuildFailureSnafu {
                    name: AUTHOR_INDEX.to_string(),
                })?,
        )
        .send()
        .await
        .context(CreateTableSnafu)
        .map(|_| ())
}

/// The user table: keyed on `username`, with a GSI resolving bearer tokens
async fn create_users(client: &Client) -> Result<()> {
    client
        .create_table()
        .table_name(USERS_TABLE)
        .billing_mode(BillingMode::PayPerRequest)
        .set_attribute_definitions(Some(vec![
            table_attr!("username", S),
            table_attr!("token", S),
        ]))
        .set_key_schema(Some(vec![key_elem!("username", Hash)]))
        .global_secondary_indexes(
            GlobalSecondaryIndex::builder()
                .index_name(TOKEN_INDEX)
                .set_key_schema(Some(vec![key_elem!("token", Hash)]))
                .projection(project_all())
                .build()
                .context(GenericBuildFailureSnafu {
                    name: TOKEN_INDEX.to_string(),
                })?,
        )
        .send()
        .await
        .context(CreateTableSnafu)
        .map(|_| ())
}

/// Create all conduit tables
pub async fn create_tables(client: &Client) -> Result<()> {
    create_articles(client).await?;
    create_users(client).await?;
    info!("created tables {} & {}", ARTICLES_TABLE, USERS_TABLE);
    Ok(())
}
