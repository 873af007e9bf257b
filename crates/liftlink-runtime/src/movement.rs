//! Robot movement collaborator.
//!
//! Transit only needs one thing from a robot: "go to this named waypoint".
//! [`RobotMover`] is that seam; [`HttpRobotMover`] talks to the robot's
//! REST API.  Acceptance of the move request is the only confirmation the
//! robot gives.

use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use liftlink_types::{DeviceRecord, LiftError};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

/// Where on a floor a waypoint sits relative to the elevator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaypointKind {
    Approach,
    Entrance,
    Exit,
}

impl WaypointKind {
    pub fn as_str(self) -> &'static str {
        match self {
            WaypointKind::Approach => "approach",
            WaypointKind::Entrance => "entrance",
            WaypointKind::Exit => "exit",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Waypoint {
    pub floor: u8,
    pub kind: WaypointKind,
}

impl Waypoint {
    pub fn approach(floor: u8) -> Self {
        Self { floor, kind: WaypointKind::Approach }
    }

    pub fn entrance(floor: u8) -> Self {
        Self { floor, kind: WaypointKind::Entrance }
    }

    pub fn exit(floor: u8) -> Self {
        Self { floor, kind: WaypointKind::Exit }
    }

    /// Map point name, e.g. `floor_2_entrance`.
    pub fn name(&self) -> String {
        format!("floor_{}_{}", self.floor, self.kind.as_str())
    }
}

impl fmt::Display for Waypoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

#[async_trait]
pub trait RobotMover: Send + Sync {
    /// Command `robot_id` to `waypoint`.  Returns once the robot has
    /// accepted the move; failures become [`LiftError::Movement`].
    async fn move_to(&self, robot_id: &str, waypoint: &Waypoint) -> Result<(), LiftError>;
}

/// Per-robot routing data for [`HttpRobotMover`].
#[derive(Debug, Clone)]
pub struct RobotTarget {
    pub record: DeviceRecord,
    pub map_id: String,
    /// Waypoint name → map point id.  Unlisted waypoints use their name.
    pub points: HashMap<String, String>,
}

impl RobotTarget {
    pub fn point_id<'a>(&'a self, waypoint_name: &'a str) -> &'a str {
        self.points
            .get(waypoint_name)
            .map(String::as_str)
            .unwrap_or(waypoint_name)
    }
}

/// REST client posting `chassis/moves` requests.
pub struct HttpRobotMover {
    client: reqwest::Client,
    targets: RwLock<HashMap<String, RobotTarget>>,
}

impl HttpRobotMover {
    pub fn new(request_timeout: Duration) -> Result<Self, LiftError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| LiftError::Transport(format!("http client: {e}")))?;
        Ok(Self {
            client,
            targets: RwLock::new(HashMap::new()),
        })
    }

    /// Register or replace the routing data of one robot.
    pub fn register(&self, target: RobotTarget) {
        self.targets
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(target.record.id().to_string(), target);
    }

    /// URL, secret and JSON body of the move request.
    pub fn move_request(
        &self,
        robot_id: &str,
        waypoint: &Waypoint,
    ) -> Result<(String, String, Value), LiftError> {
        let targets = self.targets.read().unwrap_or_else(|e| e.into_inner());
        let target = targets
            .get(robot_id)
            .ok_or_else(|| LiftError::UnknownDevice(robot_id.to_string()))?;
        let name = waypoint.name();
        let body = json!({
            "target": {
                "type": "point",
                "point_id": target.point_id(&name),
                "map_id": target.map_id,
            }
        });
        Ok((
            format!("{}/chassis/moves", target.record.base_url()),
            target.record.secret().to_string(),
            body,
        ))
    }
}

#[async_trait]
impl RobotMover for HttpRobotMover {
    async fn move_to(&self, robot_id: &str, waypoint: &Waypoint) -> Result<(), LiftError> {
        let (url, secret, body) = self.move_request(robot_id, waypoint)?;
        let movement = |details: String| LiftError::Movement {
            robot_id: robot_id.to_string(),
            details,
        };

        debug!(%robot_id, %waypoint, %url, "posting move");
        let response = self
            .client
            .post(&url)
            .header("Secret", secret)
            .json(&body)
            .send()
            .await
            .map_err(|e| movement(format!("move to {waypoint}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            warn!(%robot_id, %waypoint, %status, "move rejected");
            return Err(movement(format!("move to {waypoint} rejected with {status}: {text}")));
        }
        info!(%robot_id, %waypoint, "move accepted");
        Ok(())
    }
}
