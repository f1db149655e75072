//! Strongly-typed identifiers used across the domain.

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

macro_rules! uuid_newtype {
    ($(#[$meta:meta])* $t:ident, $name:literal) => {
        $(#[$meta])*
        #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $t(Uuid);

        impl $t {
            /// Create a new identifier.
            ///
            /// Uses UUIDv7 (time-ordered). Prefer passing IDs explicitly in tests
            /// for determinism.
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $t {
            fn default() -> Self {
                Self::new()
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Display::fmt(&self.0, f)
            }
        }

        impl From<Uuid> for $t {
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }

        impl From<$t> for Uuid {
            fn from(value: $t) -> Self {
                value.0
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let uuid = Uuid::from_str(s)
                    .map_err(|e| DomainError::validation(format!("{}: {}", $name, e)))?;
                Ok(Self(uuid))
            }
        }
    };
}

uuid_newtype!(
    /// Identifier of a tenant (the business account owning all scoped data).
    TenantId,
    "TenantId"
);
uuid_newtype!(
    /// Identifier of a user (actor identity supplied by authentication).
    UserId,
    "UserId"
);
uuid_newtype!(
    /// Identifier of a branch (sub-location of a tenant).
    BranchId,
    "BranchId"
);
uuid_newtype!(ProductId, "ProductId");
uuid_newtype!(VariantId, "VariantId");
uuid_newtype!(MovementId, "MovementId");
uuid_newtype!(AlertId, "AlertId");
uuid_newtype!(AdjustmentId, "AdjustmentId");
uuid_newtype!(SaleId, "SaleId");
uuid_newtype!(SaleLineId, "SaleLineId");
uuid_newtype!(PurchaseOrderId, "PurchaseOrderId");
uuid_newtype!(PurchaseLineId, "PurchaseLineId");
uuid_newtype!(TransferId, "TransferId");
uuid_newtype!(SupplierId, "SupplierId");
uuid_newtype!(CustomerId, "CustomerId");
uuid_newtype!(PaymentId, "PaymentId");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_valid_uuid() {
        let id = TenantId::new();
        let parsed: TenantId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn rejects_garbage_with_type_name() {
        let err = "not-a-uuid".parse::<ProductId>().unwrap_err();
        match err {
            DomainError::Validation(msg) => assert!(msg.starts_with("ProductId")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn serializes_transparently() {
        let id = AlertId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));
    }
}
