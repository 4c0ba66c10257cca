/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::fmt;

use aws_types::os_shim_internal::Env;

/// Environment variable holding the fallback access key id
pub const ACCESS_KEY_ENV: &str = "AWS_ACCESS_KEY";

/// Environment variable holding the fallback secret access key
pub const SECRET_KEY_ENV: &str = "AWS_SECRET_KEY";

/// A static access key / secret key pair.
#[derive(Clone, Eq, PartialEq)]
pub struct KeyPair {
    access_key: String,
    secret_key: String,
}

impl KeyPair {
    /// Create a new key pair
    pub fn new(access_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            access_key: access_key.into(),
            secret_key: secret_key.into(),
        }
    }

    /// The access key id
    pub fn access_key(&self) -> &str {
        &self.access_key
    }

    /// The secret access key
    pub fn secret_key(&self) -> &str {
        &self.secret_key
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("access_key", &self.access_key)
            .field("secret_key", &"** redacted **")
            .finish()
    }
}

/// Resolves inline credentials against a snapshot of the process environment.
///
/// Inline values always win. Empty values, inline or from the environment, count as absent.
#[derive(Debug, Clone)]
pub struct CredentialResolver {
    env: Env,
}

impl CredentialResolver {
    /// Create a resolver over the given environment snapshot
    pub fn new(env: Env) -> Self {
        Self { env }
    }

    /// Create a resolver over the real process environment
    pub fn from_env() -> Self {
        Self::new(Env::real())
    }

    fn lookup(&self, var: &str) -> Option<String> {
        self.env.get(var).ok().filter(|v| !v.is_empty())
    }

    /// Effective access key: the inline value or [`ACCESS_KEY_ENV`]
    pub fn access_key(&self, inline: Option<&str>) -> Option<String> {
        non_empty(inline).or_else(|| self.lookup(ACCESS_KEY_ENV))
    }

    /// Effective secret key: the inline value or [`SECRET_KEY_ENV`]
    pub fn secret_key(&self, inline: Option<&str>) -> Option<String> {
        non_empty(inline).or_else(|| self.lookup(SECRET_KEY_ENV))
    }

    /// Resolve a complete key pair, `None` unless both halves are available.
    pub fn resolve(&self, access_key: Option<&str>, secret_key: Option<&str>) -> Option<KeyPair> {
        let access_key = self.access_key(access_key)?;
        let secret_key = self.secret_key(secret_key)?;
        Some(KeyPair {
            access_key,
            secret_key,
        })
    }
}

impl Default for CredentialResolver {
    fn default() -> Self {
        Self::from_env()
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value.filter(|v| !v.is_empty()).map(str::to_owned)
}
