//! Hive - Rust 多智能体编排内核
//!
//! 模块划分：
//! - **agent**: Agent 运行时与工厂（按配置实例化，带工具调用循环）
//! - **cache**: 类型化缓存键、数据访问层与订阅
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: Space 容器、协作、并行调度、会话监管、编排器
//! - **llm**: LLM 客户端抽象与 Mock 实现
//! - **memory**: 对话历史与输入队列
//! - **plan**: 任务状态机、计划与计划生成
//! - **store**: 记录存储（内存 / SQLite）
//! - **tools**: 工具注册表与执行器
//! - **workflow**: 工作流定义、模板与引擎

pub mod agent;
pub mod cache;
pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod plan;
pub mod store;
pub mod tools;
pub mod workflow;

pub use crate::core::{OrchestraError, OrchestraRequest, Orchestrator};
