/*
 * SPDX-FileCopyrightText: Copyright (c) 2026 RouteMQ Contributors. All rights reserved.
 * SPDX-License-Identifier: Apache-2.0
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 * http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

// src/client.rs
// The broker connection abstraction. BrokerClient is the narrow,
// object-safe surface that middleware and handlers see through
// Context::client (spec.md §4.2, "handlers may publish via the
// injected client"); BrokerConnection owns the actual rumqttc
// AsyncClient/EventLoop pair and is driven by the dispatcher.

use std::time::Duration;

use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use rumqttc::{AsyncClient, EventLoop, MqttOptions, QoS};
use tracing::{info, warn};

use crate::errors::{Result, RouteMqError};

#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive: Duration,
    pub clean_session: bool,
    pub event_channel_capacity: usize,
    // shared_group is the consumer-group name used when a route is
    // registered with RouteOptions::shared (spec.md §4.3, "shared
    // subscriptions"). All RouteMQ instances in the same logical
    // deployment should use the same group name.
    pub shared_group: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            client_id: format!("routemq-{}", uuid::Uuid::new_v4()),
            username: None,
            password: None,
            keep_alive: Duration::from_secs(30),
            clean_session: false,
            event_channel_capacity: 1000,
            shared_group: "routemq".to_string(),
        }
    }
}

impl BrokerConfig {
    fn to_mqtt_options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(self.client_id.clone(), self.host.clone(), self.port);
        options.set_keep_alive(self.keep_alive);
        options.set_clean_session(self.clean_session);
        if let (Some(username), Some(password)) = (&self.username, &self.password) {
            options.set_credentials(username.clone(), password.clone());
        }
        options
    }
}

// BrokerClient is the handle handlers and middleware use to publish
// back to the broker. It is object-safe so Context can hold it as a
// trait object and tests can substitute NoopBrokerClient.
#[async_trait]
pub trait BrokerClient: Send + Sync + std::fmt::Debug {
    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
    ) -> Result<()>;

    async fn subscribe(&self, topic_filter: &str, qos: QoS) -> Result<()>;

    async fn unsubscribe(&self, topic_filter: &str) -> Result<()>;

    async fn disconnect(&self) -> Result<()>;
}

// RumqttcBrokerClient is the production BrokerClient, a thin wrapper
// over rumqttc::AsyncClient (itself already an Arc-friendly handle
// clone of the underlying connection).
#[derive(Debug, Clone)]
pub struct RumqttcBrokerClient {
    inner: AsyncClient,
}

impl RumqttcBrokerClient {
    pub fn new(inner: AsyncClient) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl BrokerClient for RumqttcBrokerClient {
    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
    ) -> Result<()> {
        self.inner
            .publish(topic, qos, retain, payload)
            .await
            .map_err(RouteMqError::from)
    }

    async fn subscribe(&self, topic_filter: &str, qos: QoS) -> Result<()> {
        self.inner
            .subscribe(topic_filter, qos)
            .await
            .map_err(RouteMqError::from)
    }

    async fn unsubscribe(&self, topic_filter: &str) -> Result<()> {
        self.inner
            .unsubscribe(topic_filter)
            .await
            .map_err(RouteMqError::from)
    }

    async fn disconnect(&self) -> Result<()> {
        self.inner.disconnect().await.map_err(RouteMqError::from)
    }
}

// NoopBrokerClient is a test/demo double: it records nothing, fails
// nothing, and talks to no broker. Used by middleware unit tests and
// by routemq-demo when run without a configured broker.
#[derive(Debug, Default, Clone)]
pub struct NoopBrokerClient;

#[async_trait]
impl BrokerClient for NoopBrokerClient {
    async fn publish(&self, _topic: &str, _payload: Vec<u8>, _qos: QoS, _retain: bool) -> Result<()> {
        Ok(())
    }

    async fn subscribe(&self, _topic_filter: &str, _qos: QoS) -> Result<()> {
        Ok(())
    }

    async fn unsubscribe(&self, _topic_filter: &str) -> Result<()> {
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        Ok(())
    }
}

// connect establishes the initial MQTT session, retrying the first
// handshake with exponential backoff and jitter (spec.md §6, "the
// broker connection must survive a cold-start race against the
// broker container coming up"). Once the EventLoop is handed back to
// the dispatcher, steady-state reconnection is rumqttc's own
// responsibility -- it reconnects transparently as long as something
// keeps calling `poll()`.
pub async fn connect(config: &BrokerConfig) -> Result<(RumqttcBrokerClient, EventLoop)> {
    let mqtt_options = config.to_mqtt_options();
    let capacity = config.event_channel_capacity;

    let attempt = || async {
        let (client, mut event_loop) = AsyncClient::new(mqtt_options.clone(), capacity);
        // The first poll() is what actually performs the TCP connect
        // and CONNACK handshake; everything up to here is just local
        // struct construction.
        match event_loop.poll().await {
            Ok(_) => Ok((client, event_loop)),
            Err(err) => {
                warn!("initial broker connection attempt failed: {err}");
                Err(err)
            }
        }
    };

    let backoff = ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(200))
        .with_max_delay(Duration::from_secs(10))
        .with_max_times(8)
        .with_jitter();

    let (client, event_loop) = attempt
        .retry(backoff)
        .notify(|err, dur| {
            warn!("retrying broker connection in {dur:?} after error: {err}");
        })
        .await
        .map_err(RouteMqError::from)?;

    info!(
        client_id = %config.client_id,
        host = %config.host,
        port = config.port,
        "connected to MQTT broker"
    );

    Ok((RumqttcBrokerClient::new(client), event_loop))
}
