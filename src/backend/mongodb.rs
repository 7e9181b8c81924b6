// Copyright (c) 2019 Julead Developers
//
// Permission is hereby granted, free of charge, to any person obtaining a copy
// of this software and associated documentation files (the "Software"), to deal
// in the Software without restriction, including without limitation the rights
// to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
// copies of the Software, and to permit persons to whom the Software is
// furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in all
// copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
// OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
// SOFTWARE.

//! The MongoDB meta backend.
//!
//! The backend path has the form `host:database`; the server is always
//! addressed on port 27017.  Each namespace maps to a collection whose
//! documents have the shape `{key, value}` with a unique index on `key`;
//! callers only ever see the embedded `value` document.

use crate::backend::{BackendError, BackendResult, MetaBackend, MetaIterator};
use bson::{doc, Document};
use mongodb::options::IndexOptions;
use mongodb::sync::{Client, Cursor};
use mongodb::IndexModel;

const MONGODB_PORT: u16 = 27017;

pub struct MongoBackend {
    client: Option<Client>,
    database: String,
}

pub fn new_backend() -> Box<dyn MetaBackend> {
    Box::new(MongoBackend {
        client: None,
        database: String::new(),
    })
}

impl From<mongodb::error::Error> for BackendError {
    fn from(e: mongodb::error::Error) -> BackendError { BackendError::Database(e.to_string()) }
}

fn parse_path(path: &str) -> BackendResult<(String, String)> {
    let mut parts = path.splitn(2, ':');

    let host = parts.next().unwrap_or("");
    let database = parts.next().unwrap_or("");

    if host.is_empty() || database.is_empty() {
        return Err(BackendError::InvalidPath(format!(
            "expected 'host:database', got '{}'",
            path
        )));
    }

    Ok((host.to_string(), database.to_string()))
}

impl MongoBackend {
    fn collection(&self, namespace: &str) -> BackendResult<mongodb::sync::Collection<Document>> {
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| BackendError::Database("backend is not initialized".to_string()))?;

        Ok(client.database(&self.database).collection::<Document>(namespace))
    }
}

impl MetaBackend for MongoBackend {
    fn init(&mut self, path: &str) -> BackendResult<()> {
        let (host, database) = parse_path(path)?;

        let client = Client::with_uri_str(&format!("mongodb://{}:{}", host, MONGODB_PORT))?;

        // The client connects lazily; ping now so an unreachable server
        // fails startup instead of the first request.
        client.database(&database).run_command(doc! { "ping": 1 }, None)?;

        info!("[mongodb] connected to {}:{}, database '{}'", host, MONGODB_PORT, database);

        self.client = Some(client);
        self.database = database;

        Ok(())
    }

    fn fini(&mut self) {
        self.client = None;
        self.database.clear();
    }

    fn create(&self, namespace: &str, key: &str, value: &Document) -> BackendResult<()> {
        let collection = self.collection(namespace)?;

        let index = IndexModel::builder()
            .keys(doc! { "key": 1 })
            .options(IndexOptions::builder().unique(true).build())
            .build();
        collection.create_index(index, None)?;

        collection.insert_one(doc! { "key": key, "value": value.clone() }, None)?;

        Ok(())
    }

    fn delete(&self, namespace: &str, key: &str) -> BackendResult<()> {
        let collection = self.collection(namespace)?;
        collection.delete_many(doc! { "key": key }, None)?;
        Ok(())
    }

    fn get(&self, namespace: &str, key: &str) -> BackendResult<Option<Document>> {
        let collection = self.collection(namespace)?;
        let found = collection.find_one(doc! { "key": key }, None)?;

        match found {
            Some(document) => match document.get_document("value") {
                Ok(value) => Ok(Some(value.clone())),
                Err(_) => Err(BackendError::Database(format!(
                    "document for key '{}' has no value subdocument",
                    key
                ))),
            },
            None => Ok(None),
        }
    }

    fn get_all(&self, namespace: &str) -> BackendResult<Box<dyn MetaIterator>> {
        let collection = self.collection(namespace)?;
        let cursor = collection.find(None, None)?;
        Ok(Box::new(MongoIterator { cursor }))
    }
}

struct MongoIterator {
    cursor: Cursor<Document>,
}

impl MetaIterator for MongoIterator {
    fn next(&mut self) -> BackendResult<Option<Document>> {
        match self.cursor.next() {
            None => Ok(None),
            Some(Err(e)) => Err(e.into()),
            Some(Ok(document)) => match document.get_document("value") {
                Ok(value) => Ok(Some(value.clone())),
                Err(_) => Err(BackendError::Database(
                    "document has no value subdocument".to_string(),
                )),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_splits_into_host_and_database() {
        let (host, database) = parse_path("localhost:julea").unwrap();
        assert_eq!(host, "localhost");
        assert_eq!(database, "julea");
    }

    #[test]
    fn database_may_contain_separators() {
        let (host, database) = parse_path("db.example.com:julea:extra").unwrap();
        assert_eq!(host, "db.example.com");
        assert_eq!(database, "julea:extra");
    }

    #[test]
    fn incomplete_paths_are_rejected() {
        assert!(parse_path("localhost").is_err());
        assert!(parse_path("localhost:").is_err());
        assert!(parse_path(":julea").is_err());
        assert!(parse_path("").is_err());
    }

    // Requires a mongod listening on localhost:27017.
    #[test]
    #[ignore]
    fn document_roundtrip_against_local_server() {
        let mut backend = MongoBackend {
            client: None,
            database: String::new(),
        };
        backend.init("localhost:julead-test").unwrap();

        backend.delete("test-ns", "key-1").unwrap();
        backend
            .create("test-ns", "key-1", &doc! { "name": "item-1", "size": 42_i64 })
            .unwrap();

        let value = backend.get("test-ns", "key-1").unwrap().unwrap();
        assert_eq!(value.get_str("name").unwrap(), "item-1");

        let mut iterator = backend.get_all("test-ns").unwrap();
        let mut seen = 0;
        while let Some(document) = iterator.next().unwrap() {
            assert!(document.contains_key("name"));
            seen += 1;
        }
        assert_eq!(seen, 1);

        backend.delete("test-ns", "key-1").unwrap();
        assert!(backend.get("test-ns", "key-1").unwrap().is_none());

        backend.fini();
    }
}
