//! The row schema shared with the destination table.

use prost::Message;
use prost_types::field_descriptor_proto::{Label, Type};
use prost_types::{DescriptorProto, FieldDescriptorProto};

use crate::errors::Error;
use crate::types::ProtoSchema;

/// Timestamp layout of [`CustomerRecord::when`].
pub const WHEN_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One synthetic customer sighting.
///
/// Mirrors the proto2 definition
///
/// ```text
/// message CustomerRecord {
///   optional string when = 1;
///   optional string name = 2;
///   optional string licenseplate = 3;
/// }
/// ```
#[derive(Clone, PartialEq, Message)]
pub struct CustomerRecord {
    #[prost(string, optional, tag = "1")]
    pub when: Option<String>,
    #[prost(string, optional, tag = "2")]
    pub name: Option<String>,
    #[prost(string, optional, tag = "3")]
    pub licenseplate: Option<String>,
}

impl CustomerRecord {
    pub const MESSAGE_NAME: &'static str = "CustomerRecord";

    pub fn new(
        when: impl Into<String>,
        name: impl Into<String>,
        licenseplate: impl Into<String>,
    ) -> Self {
        Self {
            when: Some(when.into()),
            name: Some(name.into()),
            licenseplate: Some(licenseplate.into()),
        }
    }

    pub fn encode_row(&self) -> Result<Vec<u8>, Error> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        self.encode(&mut buf)?;
        Ok(buf)
    }

    pub fn descriptor() -> DescriptorProto {
        DescriptorProto {
            name: Some(Self::MESSAGE_NAME.to_string()),
            field: vec![
                optional_string("when", 1),
                optional_string("name", 2),
                optional_string("licenseplate", 3),
            ],
            ..Default::default()
        }
    }

    /// Writer schema sent on the first append of a stream.
    pub fn writer_schema() -> ProtoSchema {
        ProtoSchema {
            proto_descriptor: Some(Self::descriptor()),
        }
    }
}

fn optional_string(name: &str, number: i32) -> FieldDescriptorProto {
    FieldDescriptorProto {
        name: Some(name.to_string()),
        number: Some(number),
        label: Some(Label::Optional as i32),
        r#type: Some(Type::String as i32),
        ..Default::default()
    }
}
