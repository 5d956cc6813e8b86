//! # Restbench Serializer
//!
//! Bidirectional mapping between a collection (with its folders and
//! requests) and a directory of YAML documents, the shape committed to the
//! sync remote:
//!
//! ```text
//! {collection_uuid}/
//!   _collection.yaml
//!   _manifest.yaml
//!   {request_uuid}.yaml
//!   {folder_uuid}/
//!     _folder.yaml
//!     _manifest.yaml
//!     {nested_uuid}.yaml
//! ```
//!
//! Environment associations are written as cross-machine hints (vault path
//! or name slug), never raw ids, so a pull on a different machine can
//! re-resolve them.

pub mod deserialize;
pub mod documents;
pub mod error;
pub mod serialize;

pub use deserialize::{deserialize_collection, ImportedCollection, ImportedFolder, ImportedRequest};
pub use error::{Result, SerializerError};
pub use serialize::{serialize_collection, serialize_request_document, CollectionBundle};
