//! S3 RestXml serialization for the switchyard gateway.
//!
//! Response bodies are produced through the [`S3Serialize`] trait and
//! [`to_xml`], which emit the XML declaration and the
//! `http://s3.amazonaws.com/doc/2006-03-01/` namespace on the root element.
//! The only XML request body the gateway accepts, `CompleteMultipartUpload`,
//! is parsed in [`deserialize`].

pub mod deserialize;
pub mod error;
pub mod serialize;

pub use deserialize::parse_complete_multipart_upload;
pub use error::{XmlError, error_to_xml};
pub use serialize::{S3Serialize, to_xml};
