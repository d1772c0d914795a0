/*
 *  Copyright 2025-2026 Colliery Software
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! Implementation of the `bindings` command.

use super::Checkout;
use anyhow::Result;
use assure::TrustStore;

/// Print every trust binding of the checkout.
pub async fn run(checkout: &Checkout) -> Result<()> {
    let bindings = TrustStore::new(&checkout.substrate).list().await?;
    if bindings.is_empty() {
        println!("no trust bindings configured");
    }
    for binding in bindings {
        println!("{}", binding);
    }
    Ok(())
}
