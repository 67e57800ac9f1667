use crate::frame::frame_errors::ParseError;
use crate::frame::server_event_type::EventType;
use crate::frame::types;
use std::net::SocketAddr;

/// A server-pushed event, always delivered on stream id -1.
#[derive(Debug, Clone)]
pub enum Event {
    TopologyChange(TopologyChangeEvent),
    StatusChange(StatusChangeEvent),
    SchemaChange(SchemaChangeEvent),
}

#[derive(Debug, Clone)]
pub enum TopologyChangeEvent {
    NewNode(SocketAddr),
    RemovedNode(SocketAddr),
}

#[derive(Debug, Clone)]
pub enum StatusChangeEvent {
    Up(SocketAddr),
    Down(SocketAddr),
}

#[derive(Debug, Clone)]
pub enum SchemaChangeEvent {
    KeyspaceChange {
        change_type: SchemaChangeType,
        keyspace_name: String,
    },
    TableChange {
        change_type: SchemaChangeType,
        keyspace_name: String,
        object_name: String,
    },
    TypeChange {
        change_type: SchemaChangeType,
        keyspace_name: String,
        type_name: String,
    },
    FunctionChange {
        change_type: SchemaChangeType,
        keyspace_name: String,
        function_name: String,
        arguments: Vec<String>,
    },
    AggregateChange {
        change_type: SchemaChangeType,
        keyspace_name: String,
        aggregate_name: String,
        arguments: Vec<String>,
    },
}

impl SchemaChangeEvent {
    /// The keyspace the change applies to.
    pub fn keyspace(&self) -> &str {
        match self {
            Self::KeyspaceChange { keyspace_name, .. }
            | Self::TableChange { keyspace_name, .. }
            | Self::TypeChange { keyspace_name, .. }
            | Self::FunctionChange { keyspace_name, .. }
            | Self::AggregateChange { keyspace_name, .. } => keyspace_name,
        }
    }

    /// The table the change applies to, if it is table-scoped.
    pub fn table(&self) -> Option<&str> {
        match self {
            Self::TableChange { object_name, .. } => Some(object_name),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaChangeType {
    Created,
    Updated,
    Dropped,
    Invalid,
}

impl Event {
    pub fn deserialize(buf: &mut &[u8]) -> Result<Self, ParseError> {
        let event_type: EventType = types::read_string(buf)?.parse()?;
        match event_type {
            EventType::TopologyChange => {
                Ok(Self::TopologyChange(TopologyChangeEvent::deserialize(buf)?))
            }
            EventType::StatusChange => Ok(Self::StatusChange(StatusChangeEvent::deserialize(buf)?)),
            EventType::SchemaChange => Ok(Self::SchemaChange(SchemaChangeEvent::deserialize(buf)?)),
        }
    }
}

impl SchemaChangeEvent {
    pub fn deserialize(buf: &mut &[u8]) -> Result<Self, ParseError> {
        let type_of_change = match types::read_string(buf)? {
            "CREATED" => SchemaChangeType::Created,
            "UPDATED" => SchemaChangeType::Updated,
            "DROPPED" => SchemaChangeType::Dropped,
            _ => SchemaChangeType::Invalid,
        };

        let target = types::read_string(buf)?;
        let keyspace_affected = types::read_string(buf)?.to_string();

        match target {
            "KEYSPACE" => Ok(Self::KeyspaceChange {
                change_type: type_of_change,
                keyspace_name: keyspace_affected,
            }),
            "TABLE" => {
                let table_name = types::read_string(buf)?.to_string();
                Ok(Self::TableChange {
                    change_type: type_of_change,
                    keyspace_name: keyspace_affected,
                    object_name: table_name,
                })
            }
            "TYPE" => {
                let changed_type = types::read_string(buf)?.to_string();
                Ok(Self::TypeChange {
                    change_type: type_of_change,
                    keyspace_name: keyspace_affected,
                    type_name: changed_type,
                })
            }
            "FUNCTION" => {
                let function_name = types::read_string(buf)?.to_string();
                Ok(Self::FunctionChange {
                    change_type: type_of_change,
                    keyspace_name: keyspace_affected,
                    function_name,
                    arguments: read_argument_list(buf)?,
                })
            }
            "AGGREGATE" => {
                let aggregate_name = types::read_string(buf)?.to_string();
                Ok(Self::AggregateChange {
                    change_type: type_of_change,
                    keyspace_name: keyspace_affected,
                    aggregate_name,
                    arguments: read_argument_list(buf)?,
                })
            }
            _ => Err(ParseError::BadIncomingData(format!(
                "Invalid schema change target: {}",
                target
            ))),
        }
    }
}

fn read_argument_list(buf: &mut &[u8]) -> Result<Vec<String>, ParseError> {
    let n = types::read_short(buf)?;
    let mut arguments = Vec::with_capacity(n as usize);
    for _ in 0..n {
        arguments.push(types::read_string(buf)?.to_string());
    }
    Ok(arguments)
}

impl TopologyChangeEvent {
    pub fn deserialize(buf: &mut &[u8]) -> Result<Self, ParseError> {
        let type_of_change = types::read_string(buf)?.to_string();
        let addr = types::read_inet(buf)?;

        match type_of_change.as_str() {
            "NEW_NODE" => Ok(Self::NewNode(addr)),
            "REMOVED_NODE" => Ok(Self::RemovedNode(addr)),
            _ => Err(ParseError::BadIncomingData(format!(
                "Invalid topology change type: {}",
                type_of_change
            ))),
        }
    }
}

impl StatusChangeEvent {
    pub fn deserialize(buf: &mut &[u8]) -> Result<Self, ParseError> {
        let type_of_change = types::read_string(buf)?.to_string();
        let addr = types::read_inet(buf)?;

        match type_of_change.as_str() {
            "UP" => Ok(Self::Up(addr)),
            "DOWN" => Ok(Self::Down(addr)),
            _ => Err(ParseError::BadIncomingData(format!(
                "Invalid status change type: {}",
                type_of_change
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    #[test]
    fn deserialize_status_change() {
        let mut buf = Vec::new();
        types::write_string("STATUS_CHANGE", &mut buf).unwrap();
        types::write_string("UP", &mut buf).unwrap();
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)), 9042);
        types::write_inet(addr, &mut buf);

        let event = Event::deserialize(&mut &buf[..]).unwrap();
        match event {
            Event::StatusChange(StatusChangeEvent::Up(a)) => assert_eq!(a, addr),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn deserialize_table_schema_change() {
        let mut buf = Vec::new();
        types::write_string("SCHEMA_CHANGE", &mut buf).unwrap();
        types::write_string("UPDATED", &mut buf).unwrap();
        types::write_string("TABLE", &mut buf).unwrap();
        types::write_string("ks", &mut buf).unwrap();
        types::write_string("users", &mut buf).unwrap();

        let event = Event::deserialize(&mut &buf[..]).unwrap();
        match event {
            Event::SchemaChange(change) => {
                assert_eq!(change.keyspace(), "ks");
                assert_eq!(change.table(), Some("users"));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn unknown_event_type_is_rejected() {
        let mut buf = Vec::new();
        types::write_string("SOMETHING_ELSE", &mut buf).unwrap();
        assert!(Event::deserialize(&mut &buf[..]).is_err());
    }
}
