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

//! # http
//!
//! The response envelopes & the application state shared by all handlers.

use crate::{identity::Provider, repository::Articles, views::ArticleView};

use axum::Json;
use serde::{Deserialize, Serialize};

use std::sync::Arc;

/// A serializable struct for use in HTTP error responses
///
/// Every failure, whatever its status code, carries a body of this shape. The handlers' error
/// types produce one from their `status_and_message()` mappings.
#[derive(Debug, Deserialize, Serialize)]
pub struct MessageBody {
    pub message: String,
}

impl axum::response::IntoResponse for MessageBody {
    fn into_response(self) -> axum::response::Response {
        Json(self).into_response()
    }
}

/// `{"article": {...}}`
#[derive(Debug, Deserialize, Serialize)]
pub struct ArticleBody {
    pub article: ArticleView,
}

/// `{"articles": [...]}`
#[derive(Debug, Deserialize, Serialize)]
pub struct ArticlesBody {
    pub articles: Vec<ArticleView>,
}

/// `{"tags": [...]}`
#[derive(Debug, Deserialize, Serialize)]
pub struct TagsBody {
    pub tags: Vec<String>,
}

/// Application state available to all handlers
pub struct Conduit {
    pub articles: Articles,
    pub identity: Arc<dyn Provider + Send + Sync>,
}
