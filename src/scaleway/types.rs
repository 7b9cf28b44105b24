//! String newtypes for values returned by the Instances API.

use std::fmt;

macro_rules! api_string {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, Eq, PartialEq)]
        pub(crate) struct $name(String);

        impl $name {
            pub(crate) const fn as_str(&self) -> &str {
                self.0.as_str()
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_owned())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

api_string!(
    /// Server UUID.
    InstanceId
);
api_string!(
    /// Availability zone such as `fr-par-1`.
    Zone
);
api_string!(
    /// Server state such as `running` or `stopped`.
    InstanceState
);
api_string!(
    /// Entry of a server's `allowed_actions`.
    Action
);

impl InstanceState {
    pub(crate) fn is_running(&self) -> bool {
        self.0 == "running"
    }
}
