/// Declares a newtype wrapper with a `new` constructor and `Deref` to the wrapped type.
macro_rules! new_type {
    (
        $(#[$attr:meta])*
        $vis:vis $name:ident(
            $(#[$type_attr:meta])*
            $type:ty
        )
    ) => {
        new_type![
            @new_type $(#[$attr])*,
            $vis $name(
                $(#[$type_attr])*
                $type
            ),
            concat!(
                "Create a new `",
                stringify!($name),
                "` to wrap the given `",
                stringify!($type),
                "`."
            )
        ];
    };
    // Actual implementation, after stringifying the #[doc] attr.
    (
        @new_type $(#[$attr:meta])*,
        $vis:vis $name:ident(
            $(#[$type_attr:meta])*
            $type:ty
        ),
        $new_doc:expr
    ) => {
        $(#[$attr])*
        #[derive(Clone, Debug, Eq, PartialEq)]
        $vis struct $name(
            $(#[$type_attr])*
            $type
        );
        impl $name {
            #[doc = $new_doc]
            #[allow(dead_code)]
            pub fn new(s: $type) -> Self {
                $name(s)
            }
        }
        impl std::ops::Deref for $name {
            type Target = $type;
            fn deref(&self) -> &$type {
                &self.0
            }
        }
    };
}

/// Declares a newtype around a `String` with a transparent `Display` and `AsRef<str>`.
macro_rules! new_string_type {
    (
        $(#[$attr:meta])*
        $name:ident
    ) => {
        new_type![
            $(#[$attr])*
            #[derive(
                serde::Deserialize, Hash, Ord, PartialOrd, serde::Serialize,
            )]
            #[serde(transparent)]
            pub $name(String)
        ];
        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                std::fmt::Display::fmt(&self.0, f)
            }
        }
        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                $name(s.to_string())
            }
        }
    };
}
