// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 The cdm-device-agent Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Key pair and CSR generation for device enrollment.
//!
//! The device identity is an EC P-256 key pair with a PKCS#10 request
//! whose subject is `CN=<device_id>, O=<org>, OU=<tenant_id>`, signed
//! with ECDSA/SHA-256 (the rcgen default for P-256 keys).

use rcgen::{CertificateParams, DnType, KeyPair};

use crate::config::DeviceIdentity;
use crate::error::EnrollError;

/// Builder for the device certificate signing request.
///
/// # Example
///
/// ```no_run
/// use cdm_device_agent::csr::CsrBuilder;
///
/// let (csr_pem, key_pair) = CsrBuilder::new()
///     .common_name("device-001")
///     .organization("CDM")
///     .organizational_unit("tenant1")
///     .build()
///     .expect("CSR generation");
/// # let _ = (csr_pem, key_pair);
/// ```
pub struct CsrBuilder {
    params: CertificateParams,
    key_pair: Option<KeyPair>,
}

impl Default for CsrBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl CsrBuilder {
    /// Create a new CSR builder with an empty subject.
    pub fn new() -> Self {
        Self {
            params: CertificateParams::default(),
            key_pair: None,
        }
    }

    /// Set the Common Name (CN) for the subject.
    pub fn common_name(mut self, cn: impl Into<String>) -> Self {
        self.params
            .distinguished_name
            .push(DnType::CommonName, cn.into());
        self
    }

    /// Set the Organization (O) for the subject.
    pub fn organization(mut self, org: impl Into<String>) -> Self {
        self.params
            .distinguished_name
            .push(DnType::OrganizationName, org.into());
        self
    }

    /// Set the Organizational Unit (OU) for the subject.
    pub fn organizational_unit(mut self, ou: impl Into<String>) -> Self {
        self.params
            .distinguished_name
            .push(DnType::OrganizationalUnitName, ou.into());
        self
    }

    /// Use an existing key pair instead of generating a fresh one.
    pub fn with_key_pair(mut self, key_pair: KeyPair) -> Self {
        self.key_pair = Some(key_pair);
        self
    }

    /// Build the CSR, generating a fresh EC P-256 key pair unless one
    /// was supplied.
    ///
    /// Returns the PEM-encoded CSR and the key pair that signed it.
    pub fn build(self) -> Result<(String, KeyPair), EnrollError> {
        let key_pair = match self.key_pair {
            Some(kp) => kp,
            None => KeyPair::generate().map_err(|e| EnrollError::key_gen(e.to_string()))?,
        };

        let csr = self
            .params
            .serialize_request(&key_pair)
            .map_err(|e| EnrollError::csr_build(e.to_string()))?;
        let csr_pem = csr
            .pem()
            .map_err(|e| EnrollError::csr_build(e.to_string()))?;

        Ok((csr_pem, key_pair))
    }
}

/// Generate the enrollment CSR for a device identity.
///
/// Subject: `CN=<device_id>, O=<org>, OU=<tenant_id>`.
pub fn device_csr(identity: &DeviceIdentity) -> Result<(String, KeyPair), EnrollError> {
    CsrBuilder::new()
        .common_name(&identity.device_id)
        .organization(&identity.org)
        .organizational_unit(&identity.tenant_id)
        .build()
}
