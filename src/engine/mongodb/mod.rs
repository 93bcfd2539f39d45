//! `MongoDB` Database Engine Implementation
//!
//! This module implements the `DatabaseEngine` trait for the `MongoDB` document store.
//!
//! # Implementation Notes
//! - Uses the official `mongodb` driver with a pool capped at one connection
//! - There is no catalog: each collection's fields are inferred from a sample
//!   of at most [`SAMPLE_SIZE`] documents
//! - Statements use shell syntax, see [`statement`]
//! - Documents are returned as relaxed extended JSON rows

use futures_util::TryStreamExt;
use mongodb::bson::{doc, Bson, Document};
use mongodb::options::{ClientOptions, FindOneOptions, FindOptions};
use mongodb::{Client, Database};
use tracing::debug;
use url::Url;

use crate::engine::{
    catalog, CollectionInfo, ConnectionConfig, DatabaseEngine, EngineFamily, ResultSet, SchemaInfo,
};
use crate::error::{NlQueryError, Result};

pub mod statement;

use statement::{MongoOperation, MongoStatement};

const ENGINE: &str = "mongodb";

/// Documents sampled per collection during introspection
pub const SAMPLE_SIZE: i64 = 5;

/// `MongoDB` database engine implementation
pub struct MongoEngine {
    client: Option<Client>,
    database: String,
}

impl MongoEngine {
    /// Connect and verify the deployment answers a ping
    pub async fn open(config: &ConnectionConfig) -> Result<Self> {
        let uri = build_uri(config)?;
        let database =
            ConnectionConfig::require(config.database.as_ref(), EngineFamily::MongoDb, "database")?
                .to_string();

        let mut options = ClientOptions::parse(uri.as_str()).await.map_err(|e| {
            NlQueryError::connection(ENGINE, format!("Invalid MongoDB connection options: {e}"))
        })?;
        options.max_pool_size = Some(1);
        options.app_name = Some("nlquery".to_string());

        let client = Client::with_options(options)
            .map_err(|e| NlQueryError::connection(ENGINE, format!("Failed to create MongoDB client: {e}")))?;

        // The driver connects lazily; ping so bad hosts and credentials fail here
        if let Err(e) = client.database(&database).run_command(doc! {"ping": 1}, None).await {
            client.shutdown().await;
            return Err(NlQueryError::connection(ENGINE, format!("Failed to connect to MongoDB: {e}")));
        }

        Ok(Self { client: Some(client), database })
    }

    fn db(&self) -> Result<Database> {
        self.client
            .as_ref()
            .map(|client| client.database(&self.database))
            .ok_or_else(|| NlQueryError::connection(ENGINE, "connection already closed"))
    }

    async fn run(db: Database, parsed: MongoStatement) -> mongodb::error::Result<ResultSet> {
        let collection = db.collection::<Document>(&parsed.collection);

        let documents: Vec<Document> = match parsed.operation {
            MongoOperation::Find { filter, projection, sort, limit, skip } => {
                let options = FindOptions::builder()
                    .projection(projection)
                    .sort(sort)
                    .limit(limit)
                    .skip(skip)
                    .build();
                collection.find(filter, options).await?.try_collect().await?
            }
            MongoOperation::FindOne { filter, projection } => {
                let options = FindOneOptions::builder().projection(projection).build();
                collection.find_one(filter, options).await?.into_iter().collect()
            }
            MongoOperation::Aggregate { pipeline } => {
                collection.aggregate(pipeline, None).await?.try_collect().await?
            }
            MongoOperation::CountDocuments { filter } => {
                let count = collection.count_documents(filter, None).await?;
                vec![count_document(count)]
            }
            MongoOperation::Distinct { field, filter } => {
                let values = collection.distinct(&field, filter, None).await?;
                values.into_iter().map(|value| doc! {"value": value}).collect()
            }
        };

        Ok(documents.into_iter().map(document_to_row).collect())
    }
}

impl DatabaseEngine for MongoEngine {
    fn family(&self) -> EngineFamily {
        EngineFamily::MongoDb
    }

    async fn introspect(&mut self) -> Result<SchemaInfo> {
        let db = self.db().map_err(|e| NlQueryError::introspection(ENGINE, e.message()))?;
        let introspection_error =
            |e: mongodb::error::Error| NlQueryError::introspection(ENGINE, e.to_string());

        let mut names = db.list_collection_names(None).await.map_err(introspection_error)?;
        names.sort();

        let mut collections = Vec::with_capacity(names.len());
        for name in names {
            let options = FindOptions::builder().limit(SAMPLE_SIZE).build();
            let sample: Vec<Document> = db
                .collection::<Document>(&name)
                .find(None, options)
                .await
                .map_err(introspection_error)?
                .try_collect()
                .await
                .map_err(introspection_error)?;

            let rows: Vec<_> = sample.into_iter().map(document_to_row).collect();
            collections.push(CollectionInfo { fields: catalog::infer_fields(&rows), name });
        }

        debug!(engine = ENGINE, collections = collections.len(), "Introspected schema");
        Ok(SchemaInfo::Document { collections })
    }

    async fn execute(&mut self, statement: &str) -> Result<ResultSet> {
        let db = self.db()?;
        let parsed = statement::parse(statement)?;
        debug!(engine = ENGINE, collection = %parsed.collection, "Running document query");

        Self::run(db, parsed).await.map_err(|e| NlQueryError::statement(e.to_string()))
    }

    async fn close(&mut self) {
        if let Some(client) = self.client.take() {
            client.shutdown().await;
        }
    }
}

/// Build a `mongodb://` URI with percent-encoded credentials
fn build_uri(config: &ConnectionConfig) -> Result<Url> {
    let family = EngineFamily::MongoDb;
    let host = ConnectionConfig::require(config.host.as_ref(), family, "host")?;

    let invalid = |what: &str| NlQueryError::invalid_input(format!("Invalid MongoDB {what}"));

    let mut uri = Url::parse("mongodb://localhost").map_err(|_| invalid("URI"))?;
    uri.set_host(Some(host)).map_err(|_| invalid("host"))?;
    uri.set_port(Some(config.port_or_default(family))).map_err(|()| invalid("port"))?;

    // Credentials are optional for the document store
    if let Some(user) = config.user.as_deref().filter(|u| !u.is_empty()) {
        uri.set_username(user).map_err(|()| invalid("user"))?;
        uri.set_password(config.password.as_deref()).map_err(|()| invalid("password"))?;
    }

    Ok(uri)
}

fn count_document(count: u64) -> Document {
    let count = i64::try_from(count).map_or(Bson::Double(count as f64), Bson::Int64);
    doc! {"count": count}
}

/// Convert a BSON document into a relaxed extended JSON row
fn document_to_row(document: Document) -> crate::engine::Row {
    match Bson::Document(document).into_relaxed_extjson() {
        serde_json::Value::Object(map) => map,
        _ => crate::engine::Row::new(),
    }
}
