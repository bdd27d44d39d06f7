mod common;

mod clone;
mod criterion;
mod registry;
mod sequential; // Sequential 容器测试（add/pop/build/配置往返/嵌套）
