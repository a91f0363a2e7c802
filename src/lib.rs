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

//! # conduit
//!
//! A blogging-platform API-- articles, favorites, feeds & tags-- backed by DynamoDB.
//!
//! The interesting part lives in [repository]: offset-paginated, filtered, newest-first article
//! listings built on nothing more than partition/sort-key index queries with continuation tokens.
//! Everything else is orchestration around it: [storage] defines the narrow store-adapter
//! contract (implemented for DynamoDB in [dynamodb] and in-memory in [memory]), [identity]
//! resolves bearer credentials to users, [views] projects stored records into their API-facing
//! representations, and [articles] wires it all into an axum router.
pub mod articles;
pub mod dynamodb;
pub mod entities;
pub mod http;
pub mod identity;
pub mod memory;
pub mod repository;
pub mod schemas;
pub mod storage;
pub mod views;
