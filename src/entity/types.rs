//! Entity and relationship types.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::macros::string_enum;

string_enum! {
    /// Kind of investigable object.
    pub enum EntityType {
        User = "user",
        Account = "account",
        Identity = "identity",
        Organization = "organization",
        Merchant = "merchant",
        Vendor = "vendor",
        Device = "device",
        Browser = "browser",
        UserAgent = "user_agent",
        Fingerprint = "fingerprint",
        Application = "application",
        ApiKey = "api_key",
        IpAddress = "ip_address",
        Network = "network",
        Isp = "isp",
        Asn = "asn",
        Domain = "domain",
        Url = "url",
        Email = "email",
        Phone = "phone",
        Address = "address",
        Location = "location",
        Session = "session",
        Login = "login",
        Authentication = "authentication",
        Transaction = "transaction",
        Payment = "payment",
        PaymentMethod = "payment_method",
        Card = "card",
        BankAccount = "bank_account",
        Wallet = "wallet",
        Order = "order",
        Product = "product",
        Refund = "refund",
        Chargeback = "chargeback",
        Document = "document",
        Alert = "alert",
        Rule = "rule",
        Case = "case",
        Investigation = "investigation",
    }
}

string_enum! {
    /// Kind of link between two entities.
    pub enum RelationshipType {
        Owns = "owns",
        Uses = "uses",
        LoggedInFrom = "logged_in_from",
        LocatedAt = "located_at",
        TransactedWith = "transacted_with",
        PaidWith = "paid_with",
        ConnectedTo = "connected_to",
        SharedDevice = "shared_device",
        SharedIp = "shared_ip",
        SharedEmail = "shared_email",
        SharedPhone = "shared_phone",
        SharedAddress = "shared_address",
        SharedPaymentMethod = "shared_payment_method",
        SimilarBehavior = "similar_behavior",
        Triggered = "triggered",
        AssociatedWith = "associated_with",
    }
}

/// A node in the entity graph. Entities are never deleted, only deactivated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub entity_id: String,
    pub entity_type: EntityType,
    pub name: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, serde_json::Value>,
    /// 0.0 - 1.0
    pub risk_score: f64,
    /// 0.0 - 1.0, saturating
    pub confidence_score: f64,
    /// Ids linked to this entity in either direction
    #[serde(default)]
    pub related_entities: BTreeSet<String>,
    #[serde(default)]
    pub investigations: BTreeSet<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Entity {
    pub fn new(
        entity_id: impl Into<String>,
        entity_type: EntityType,
        name: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            entity_id: entity_id.into(),
            entity_type,
            name: name.into(),
            attributes: BTreeMap::new(),
            risk_score: 0.0,
            confidence_score: 0.0,
            related_entities: BTreeSet::new(),
            investigations: BTreeSet::new(),
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_risk(mut self, risk_score: f64, confidence_score: f64) -> Self {
        self.risk_score = risk_score.clamp(0.0, 1.0);
        self.confidence_score = confidence_score.clamp(0.0, 1.0);
        self
    }
}

/// A typed edge between two entities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRelationship {
    pub relationship_id: String,
    pub source_entity_id: String,
    pub target_entity_id: String,
    pub relationship_type: RelationshipType,
    /// 0.0 - 1.0
    pub strength: f64,
    pub bidirectional: bool,
    pub observation_count: u32,
    pub first_observed: DateTime<Utc>,
    pub last_observed: DateTime<Utc>,
}

impl EntityRelationship {
    pub fn new(
        relationship_id: impl Into<String>,
        source_entity_id: impl Into<String>,
        target_entity_id: impl Into<String>,
        relationship_type: RelationshipType,
        strength: f64,
        bidirectional: bool,
    ) -> Self {
        let now = Utc::now();
        Self {
            relationship_id: relationship_id.into(),
            source_entity_id: source_entity_id.into(),
            target_entity_id: target_entity_id.into(),
            relationship_type,
            strength: strength.clamp(0.0, 1.0),
            bidirectional,
            observation_count: 1,
            first_observed: now,
            last_observed: now,
        }
    }

    /// True if the edge touches both ids, in either direction.
    pub fn connects(&self, a: &str, b: &str) -> bool {
        (self.source_entity_id == a && self.target_entity_id == b)
            || (self.source_entity_id == b && self.target_entity_id == a)
    }
}
