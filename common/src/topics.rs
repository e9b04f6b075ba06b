pub const TOPIC_SENSOR_TEMP: &str = "heating/sensor/temperature";

pub const TOPIC_BOILER_SET: &str = "heating/boiler/set";

pub const TOPIC_CONTROLLER_STATE: &str = "heating/controller/state";
pub const TOPIC_CONTROLLER_SCHEDULE_STATE: &str = "heating/controller/schedule/state";

pub const TOPIC_CMD_MODE: &str = "heating/cmnd/mode";
pub const TOPIC_CMD_TARGET: &str = "heating/cmnd/target";
pub const TOPIC_CMD_AUTO: &str = "heating/cmnd/auto";
pub const TOPIC_CMD_SCHEDULE: &str = "heating/cmnd/schedule";
