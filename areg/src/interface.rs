//! Service interface descriptors

use std::collections::{BTreeMap, BTreeSet};

use crate::address::{ServiceItem, ServiceKind};
use crate::message::{MessageId, Version};
use crate::{Error, Result};

/// Static description of a service: its requests, responses, broadcasts
/// and attributes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceInterface {
    name: String,
    version: Version,
    kind: ServiceKind,
    /// Request id to the response id that answers it
    requests: BTreeMap<MessageId, Option<MessageId>>,
    responses: BTreeSet<MessageId>,
    attributes: BTreeSet<MessageId>,
}

impl ServiceInterface {
    pub fn builder(name: impl Into<String>, version: Version) -> ServiceInterfaceBuilder {
        ServiceInterfaceBuilder {
            name: name.into(),
            version,
            kind: ServiceKind::Local,
            requests: Vec::new(),
            responses: Vec::new(),
            attributes: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn kind(&self) -> ServiceKind {
        self.kind
    }

    pub fn service_item(&self) -> ServiceItem {
        ServiceItem::new(self.name.clone(), self.version, self.kind)
    }

    pub fn is_request(&self, id: MessageId) -> bool {
        self.requests.contains_key(&id)
    }

    pub fn is_response(&self, id: MessageId) -> bool {
        self.responses.contains(&id)
    }

    pub fn is_attribute(&self, id: MessageId) -> bool {
        self.attributes.contains(&id)
    }

    /// Response id that answers `request`, `None` for fire-and-forget requests
    pub fn response_of(&self, request: MessageId) -> Option<MessageId> {
        self.requests.get(&request).copied().flatten()
    }

    pub fn contains(&self, id: MessageId) -> bool {
        self.is_request(id) || self.is_response(id) || self.is_attribute(id)
    }

    pub fn requests(&self) -> impl Iterator<Item = MessageId> + '_ {
        self.requests.keys().copied()
    }

    pub fn responses(&self) -> impl Iterator<Item = MessageId> + '_ {
        self.responses.iter().copied()
    }

    pub fn attributes(&self) -> impl Iterator<Item = MessageId> + '_ {
        self.attributes.iter().copied()
    }
}

/// Builder for [`ServiceInterface`]
#[derive(Debug, Clone)]
pub struct ServiceInterfaceBuilder {
    name: String,
    version: Version,
    kind: ServiceKind,
    requests: Vec<(MessageId, Option<MessageId>)>,
    responses: Vec<MessageId>,
    attributes: Vec<MessageId>,
}

impl ServiceInterfaceBuilder {
    /// Make the service reachable from other processes
    pub fn public(mut self) -> Self {
        self.kind = ServiceKind::Public;
        self
    }

    pub fn request(mut self, id: MessageId, response: Option<MessageId>) -> Self {
        self.requests.push((id, response));
        self
    }

    /// Declare a response or broadcast
    pub fn response(mut self, id: MessageId) -> Self {
        self.responses.push(id);
        self
    }

    pub fn broadcast(self, id: MessageId) -> Self {
        self.response(id)
    }

    pub fn attribute(mut self, id: MessageId) -> Self {
        self.attributes.push(id);
        self
    }

    /// Validate id ranges, uniqueness and request/response links
    pub fn build(self) -> Result<ServiceInterface> {
        if self.name.is_empty() {
            return Err(Error::configuration(
                "service interface needs a name",
                Some("name".to_string()),
            ));
        }
        let mut seen = BTreeSet::new();
        let mut check = |id: MessageId, valid: bool, what: &str| -> Result<()> {
            if !valid {
                return Err(Error::configuration(
                    format!("{} {} of '{}' is outside its id range", what, id, self.name),
                    Some(what.to_string()),
                ));
            }
            if !seen.insert(id) {
                return Err(Error::duplicate_name("message id", id.to_string()));
            }
            Ok(())
        };

        for (id, _) in &self.requests {
            check(*id, id.is_request(), "request")?;
        }
        for id in &self.responses {
            check(*id, id.is_response(), "response")?;
        }
        for id in &self.attributes {
            check(*id, id.is_attribute(), "attribute")?;
        }

        let responses: BTreeSet<MessageId> = self.responses.into_iter().collect();
        for (id, response) in &self.requests {
            if let Some(response) = response {
                if !responses.contains(response) {
                    return Err(Error::configuration(
                        format!(
                            "request {} of '{}' refers to undeclared response {}",
                            id, self.name, response
                        ),
                        Some("response".to_string()),
                    ));
                }
            }
        }

        Ok(ServiceInterface {
            name: self.name,
            version: self.version,
            kind: self.kind,
            requests: self.requests.into_iter().collect(),
            responses,
            attributes: self.attributes.into_iter().collect(),
        })
    }
}
