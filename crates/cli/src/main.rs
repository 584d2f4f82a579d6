use clap::{Args, Parser, Subcommand};
use env_logger::Env;
use log::{info, warn};
use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use storyforge_adapters::{create_embedding_adapter, create_llm_adapter, AdapterError};
use storyforge_core::{
    clear_index, import_knowledge, ArchitectureError, ArchitectureService, ArchitectureStage,
    BlueprintError, ChapterBlueprintService, ChapterDraftRequest, ChapterError, ChapterService,
    ConfigError, ConfigStore, DisabledKnowledgeBase, EmbeddingModel, EmbeddingModelError,
    ErrorKind, KnowledgeBase, KnowledgeError, KnowledgeIndex, LanguageModel, LanguageModelError,
    LogFacadeSink, NewProject, ProjectError, ProjectService, ProjectStore, PromptError,
    PromptRegistry, RunningDocumentError, RunningDocumentService, SharedLogSink,
};
use thiserror::Error;

const CONNECTIVITY_PROMPT: &str = "Please reply 'OK'";

fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    if let Err(err) = run() {
        eprintln!("Error: {err}");
        std::process::exit(err.exit_code());
    }
}

fn run() -> Result<(), CliError> {
    let cli = Cli::parse();
    let mut workspace = Workspace::open(&cli.config)?;

    match cli.command {
        Command::Project(command) => handle_project(&workspace, command),
        Command::Architecture(command) => handle_architecture(&mut workspace, command),
        Command::Blueprint(command) => handle_blueprint(&mut workspace, command),
        Command::Chapter(command) => handle_chapter(&mut workspace, command),
        Command::State(command) => handle_state(&mut workspace, command),
        Command::Summary(command) => handle_summary(&mut workspace, command),
        Command::Knowledge(command) => handle_knowledge(&mut workspace, command),
        Command::Config(command) => handle_config(&mut workspace, command),
    }
}

/// Everything a command needs: effective configuration, project storage and
/// the prompt catalogue.
struct Workspace {
    config_path: PathBuf,
    config: ConfigStore,
    store: ProjectStore,
    prompts: PromptRegistry,
    sink: LogFacadeSink,
}

impl Workspace {
    fn open(config_path: &Path) -> Result<Self, CliError> {
        let mut config = ConfigStore::open(config_path)?;
        config
            .config_mut()
            .apply_env_overrides(|key| env::var(key).ok())?;
        config.ensure_recent_defaults();

        let store = ProjectStore::open(config.config().storage.projects_dir.clone());
        let prompts = PromptRegistry::from_prompt_config(&config.config().prompts)?;

        Ok(Self {
            config_path: config_path.to_path_buf(),
            config,
            store,
            prompts,
            sink: LogFacadeSink::new(),
        })
    }

    fn select_llm(&self, preferred: Option<String>) -> Result<String, CliError> {
        let preferred = normalize_preference(preferred);
        match self.config.llm_profile(preferred.as_deref()) {
            Some((name, _)) => Ok(name.to_string()),
            None => Err(preferred.map_or(CliError::MissingLlmProfile, CliError::UnknownInterface)),
        }
    }

    fn select_embedding(&self, preferred: Option<String>) -> Result<Option<String>, CliError> {
        let preferred = normalize_preference(preferred);
        match self.config.embedding_profile(preferred.as_deref()) {
            Some((name, _)) => Ok(Some(name.to_string())),
            None => match preferred {
                Some(name) => Err(CliError::UnknownInterface(name)),
                None => Ok(None),
            },
        }
    }

    fn language_model(
        &self,
        preferred: Option<String>,
    ) -> Result<(String, Box<dyn LanguageModel>), CliError> {
        let name = self.select_llm(preferred)?;
        info!("使用 LLM 接口：{name}");
        let model = create_llm_adapter(self.config.config(), &name)?;
        Ok((name, model))
    }

    /// The project knowledge index, or a disabled one when no embedding
    /// profile is configured.
    fn knowledge(
        &self,
        preferred: Option<String>,
    ) -> Result<(Option<String>, Box<dyn KnowledgeBase>), CliError> {
        let Some(name) = self.select_embedding(preferred)? else {
            info!("未配置 Embedding 接口，知识检索已停用。");
            return Ok((None, Box::new(DisabledKnowledgeBase)));
        };
        let retrieval_k = self
            .config
            .config()
            .get_embedding_profile(&name)
            .map(|profile| profile.retrieval_k as usize)
            .unwrap_or(storyforge_core::knowledge::DEFAULT_RETRIEVAL_K);
        info!("使用 Embedding 接口：{name}（检索条数 {retrieval_k}）");

        let embedding: Arc<dyn EmbeddingModel> =
            create_embedding_adapter(self.config.config(), &name)?.into();
        let sink: SharedLogSink = Arc::new(self.sink.clone());
        let index = KnowledgeIndex::new(
            self.config.config().storage.vector_store_dir.clone(),
            embedding,
            sink,
        )
        .with_k(retrieval_k);
        Ok((Some(name), Box::new(index)))
    }

    /// The knowledge index without an embedding provider. Enough for project
    /// lifecycle commands, which only create and delete index files.
    fn index_files(&self) -> KnowledgeIndex {
        KnowledgeIndex::files(
            self.config.config().storage.vector_store_dir.clone(),
            Arc::new(self.sink.clone()),
        )
    }

    /// Records the interfaces used by a successful command. The file on
    /// disk is reloaded so that environment overrides are not persisted.
    fn remember(&mut self, llm: Option<String>, embedding: Option<String>) -> Result<(), CliError> {
        let mut persisted = ConfigStore::open(&self.config_path)?;
        if let Some(name) = llm {
            persisted.touch_llm_interface(name.clone());
            self.config.touch_llm_interface(name);
        }
        if let Some(name) = embedding {
            persisted.touch_embedding_interface(name.clone());
            self.config.touch_embedding_interface(name);
        }
        persisted.save()?;
        Ok(())
    }
}

fn handle_project(workspace: &Workspace, command: ProjectCommand) -> Result<(), CliError> {
    let index_files = workspace.index_files();
    let service = ProjectService::new(&workspace.store, &index_files, &workspace.sink);

    match command {
        ProjectCommand::Create(args) => {
            let project = service.create(&NewProject {
                title: args.title,
                genre: args.genre,
                topic: args.topic,
                chapter_count: args.chapters,
                target_words_per_chapter: args.words,
            })?;
            println!("{}", project.id);
        }
        ProjectCommand::List => {
            for project in service.list()? {
                println!(
                    "{}\t{}\t{}\t{}章\t{}",
                    project.id,
                    project.title,
                    project.status.label(),
                    project.chapter_count,
                    project.updated_at.format("%Y-%m-%d %H:%M")
                );
            }
        }
        ProjectCommand::Show(args) => {
            let project = service.get(&args.project)?;
            println!("{}", serde_json::to_string_pretty(&project)?);
        }
        ProjectCommand::Delete(args) => {
            if service.delete(&args.project)? {
                info!("项目 {} 已删除", args.project);
            } else {
                warn!("项目 {} 不存在，无需删除", args.project);
            }
        }
    }
    Ok(())
}

fn handle_architecture(
    workspace: &mut Workspace,
    command: ArchitectureCommand,
) -> Result<(), CliError> {
    match command {
        ArchitectureCommand::Generate(args) => {
            let (llm_name, model) = workspace.language_model(args.llm.llm_interface)?;
            let (embedding_name, knowledge) = workspace.knowledge(args.llm.embedding_interface)?;
            let mut service = ArchitectureService::new(
                &workspace.store,
                &workspace.prompts,
                knowledge.as_ref(),
                &workspace.sink,
            );
            if let Some(retries) = args.max_retries {
                service = service.with_max_retries(retries);
            }

            let outcome = service.generate(
                model.as_ref(),
                &args.project,
                &args.guidance.unwrap_or_default(),
            )?;
            info!(
                "小说架构已生成（{} 字），初始角色状态 {} 字",
                outcome.architecture.chars().count(),
                outcome.character_state.chars().count()
            );
            workspace.remember(Some(llm_name), embedding_name)
        }
        ArchitectureCommand::Show(args) => {
            let service = ProjectService::new(
                &workspace.store,
                &DisabledKnowledgeBase,
                &workspace.sink,
            );
            let architecture = service.architecture(&args.project)?;
            if !architecture.trim().is_empty() {
                println!("{architecture}");
                return Ok(());
            }

            let architecture_service = ArchitectureService::new(
                &workspace.store,
                &workspace.prompts,
                &DisabledKnowledgeBase,
                &workspace.sink,
            );
            let state = architecture_service.load_state(&args.project)?;
            for stage in ArchitectureStage::PIPELINE {
                match state.get(stage) {
                    Some(text) => println!("#=== {} ===\n{text}\n", stage.label()),
                    None => println!("#=== {} === (未生成)\n", stage.label()),
                }
            }
            Ok(())
        }
    }
}

fn handle_blueprint(workspace: &mut Workspace, command: BlueprintCommand) -> Result<(), CliError> {
    match command {
        BlueprintCommand::Generate(args) => {
            let (llm_name, model) = workspace.language_model(args.llm.llm_interface)?;
            let (embedding_name, knowledge) = workspace.knowledge(args.llm.embedding_interface)?;
            let mut service = ChapterBlueprintService::new(
                &workspace.store,
                &workspace.prompts,
                knowledge.as_ref(),
                &workspace.sink,
            );
            if let Some(retries) = args.max_retries {
                service = service.with_max_retries(retries);
            }

            let blueprint = service.generate(
                model.as_ref(),
                &args.project,
                &args.guidance.unwrap_or_default(),
            )?;
            info!("章节目录已生成（{} 字）", blueprint.chars().count());
            workspace.remember(Some(llm_name), embedding_name)
        }
        BlueprintCommand::Show(args) => {
            let service = ProjectService::new(
                &workspace.store,
                &DisabledKnowledgeBase,
                &workspace.sink,
            );
            println!("{}", service.blueprint(&args.project)?);
            Ok(())
        }
    }
}

fn handle_chapter(workspace: &mut Workspace, command: ChapterCommand) -> Result<(), CliError> {
    match command {
        ChapterCommand::Draft(args) => {
            let (llm_name, model) = workspace.language_model(args.llm.llm_interface)?;
            let (embedding_name, knowledge) = workspace.knowledge(args.llm.embedding_interface)?;
            let service = ChapterService::new(
                &workspace.store,
                &workspace.prompts,
                knowledge.as_ref(),
                &workspace.sink,
            );

            let request = ChapterDraftRequest {
                chapter_number: args.number,
                user_guidance: args.guidance.unwrap_or_default(),
                characters_involved: args.characters.unwrap_or_default(),
                key_items: args.items.unwrap_or_default(),
                scene_location: args.scene.unwrap_or_default(),
                time_constraint: args.time.unwrap_or_default(),
            };
            let draft = service.generate_draft(model.as_ref(), &args.project, &request)?;
            println!("{}", draft.content);
            workspace.remember(Some(llm_name), embedding_name)
        }
        ChapterCommand::Finalize(args) => {
            let (llm_name, model) = workspace.language_model(args.llm.llm_interface)?;
            let (embedding_name, knowledge) = workspace.knowledge(args.llm.embedding_interface)?;
            let service = ChapterService::new(
                &workspace.store,
                &workspace.prompts,
                knowledge.as_ref(),
                &workspace.sink,
            );

            let outcome = service.finalize(model.as_ref(), &args.project, args.number)?;
            info!(
                "第{}章已定稿（{} 字）",
                args.number,
                outcome.content.chars().count()
            );
            workspace.remember(Some(llm_name), embedding_name)
        }
        ChapterCommand::Show(args) => {
            let service = offline_chapters(workspace);
            let chapter = service.chapter(&args.project, args.number)?;
            if !chapter.outline.trim().is_empty() {
                println!("{}\n", chapter.outline);
            }
            println!("{}", chapter.content);
            Ok(())
        }
        ChapterCommand::List(args) => {
            let service = offline_chapters(workspace);
            for entry in service.list_chapters(&args.project)? {
                let title = entry.outline.lines().next().unwrap_or_default();
                let marker = if entry.has_content { "✔" } else { " " };
                println!("{marker} {:>3}  {title}", entry.number);
            }
            Ok(())
        }
        ChapterCommand::Save(args) => {
            let content = read_text_file(&args.file)?;
            let service = offline_chapters(workspace);
            service.save_content(&args.project, args.number, &content)?;
            Ok(())
        }
    }
}

fn offline_chapters(workspace: &Workspace) -> ChapterService<'_> {
    ChapterService::new(
        &workspace.store,
        &workspace.prompts,
        &DisabledKnowledgeBase,
        &workspace.sink,
    )
}

fn handle_state(workspace: &mut Workspace, command: RunningCommand) -> Result<(), CliError> {
    match command {
        RunningCommand::Generate(args) => {
            let (llm_name, model) = workspace.language_model(args.llm.llm_interface)?;
            let (embedding_name, knowledge) = workspace.knowledge(args.llm.embedding_interface)?;
            let mut service = RunningDocumentService::new(
                &workspace.store,
                &workspace.prompts,
                knowledge.as_ref(),
                &workspace.sink,
            );
            if let Some(retries) = args.max_retries {
                service = service.with_max_retries(retries);
            }
            let state = service.regenerate_character_state(
                model.as_ref(),
                &args.project,
                &args.guidance.unwrap_or_default(),
            )?;
            println!("{state}");
            workspace.remember(Some(llm_name), embedding_name)
        }
        RunningCommand::Show(args) => {
            let service = ProjectService::new(
                &workspace.store,
                &DisabledKnowledgeBase,
                &workspace.sink,
            );
            println!("{}", service.character_state(&args.project)?);
            Ok(())
        }
    }
}

fn handle_summary(workspace: &mut Workspace, command: RunningCommand) -> Result<(), CliError> {
    match command {
        RunningCommand::Generate(args) => {
            let (llm_name, model) = workspace.language_model(args.llm.llm_interface)?;
            let (embedding_name, knowledge) = workspace.knowledge(args.llm.embedding_interface)?;
            let mut service = RunningDocumentService::new(
                &workspace.store,
                &workspace.prompts,
                knowledge.as_ref(),
                &workspace.sink,
            );
            if let Some(retries) = args.max_retries {
                service = service.with_max_retries(retries);
            }
            let summary = service.regenerate_global_summary(
                model.as_ref(),
                &args.project,
                &args.guidance.unwrap_or_default(),
            )?;
            println!("{summary}");
            workspace.remember(Some(llm_name), embedding_name)
        }
        RunningCommand::Show(args) => {
            let service = ProjectService::new(
                &workspace.store,
                &DisabledKnowledgeBase,
                &workspace.sink,
            );
            println!("{}", service.global_summary(&args.project)?);
            Ok(())
        }
    }
}

fn handle_knowledge(workspace: &mut Workspace, command: KnowledgeCommand) -> Result<(), CliError> {
    match command {
        KnowledgeCommand::Import(args) => {
            let (embedding_name, knowledge) = workspace.knowledge(args.embedding_interface)?;
            let embedding_name = embedding_name.ok_or(CliError::MissingEmbeddingProfile)?;
            workspace.store.get(&args.project)?;

            let text = read_text_file(&args.file)?;
            let filename = args
                .file
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| args.file.display().to_string());
            let stored = import_knowledge(knowledge.as_ref(), &args.project, &filename, &text)?;
            info!("已导入 {stored} 个知识片段（{filename}）");
            workspace.remember(None, Some(embedding_name))
        }
        KnowledgeCommand::Search(args) => {
            let (_, knowledge) = workspace.knowledge(args.embedding_interface)?;
            let hits = knowledge.search(&args.project, &args.query);
            if hits.is_empty() {
                info!("未检索到相关内容");
            }
            for (rank, hit) in hits.iter().enumerate() {
                let score = hit
                    .score
                    .map(|score| format!("{score:.3}"))
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "[{}] {:?} score={score}\n{}\n",
                    rank + 1,
                    hit.metadata.doc_type,
                    hit.content
                );
            }
            Ok(())
        }
        KnowledgeCommand::Clear(args) => {
            let (_, knowledge) = workspace.knowledge(args.embedding_interface)?;
            clear_index(knowledge.as_ref(), &args.project)?;
            info!("项目 {} 的知识库已清空", args.project);
            Ok(())
        }
    }
}

fn handle_config(workspace: &mut Workspace, command: ConfigCommand) -> Result<(), CliError> {
    match command {
        ConfigCommand::TestLlm(args) => run_test_llm(workspace, args),
        ConfigCommand::TestEmbedding(args) => run_test_embedding(workspace, args),
    }
}

fn run_test_llm(workspace: &mut Workspace, args: TestInterfaceArgs) -> Result<(), CliError> {
    let (name, model) = workspace.language_model(args.interface)?;
    info!("发送测试提示词: {CONNECTIVITY_PROMPT}");

    let response = model.invoke(CONNECTIVITY_PROMPT)?;
    if response.trim().is_empty() {
        return Err(CliError::TestFailed(
            "LLM配置测试失败：未获取到响应".to_string(),
        ));
    }
    info!("✅ LLM配置测试成功！");
    println!("{response}");
    workspace.remember(Some(name), None)
}

fn run_test_embedding(workspace: &mut Workspace, args: TestInterfaceArgs) -> Result<(), CliError> {
    let name = workspace
        .select_embedding(args.interface)?
        .ok_or(CliError::MissingEmbeddingProfile)?;
    let adapter = create_embedding_adapter(workspace.config.config(), &name)?;
    info!("开始测试 Embedding 配置：{name}");

    let vector = adapter.embed_query("测试文本")?;
    if vector.is_empty() {
        return Err(CliError::TestFailed(
            "Embedding配置测试失败：未获取到向量".to_string(),
        ));
    }
    info!("✅ Embedding配置测试成功！向量维度：{}", vector.len());
    workspace.remember(None, Some(name))
}

fn read_text_file(path: &Path) -> Result<String, CliError> {
    fs::read_to_string(path).map_err(|source| CliError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn normalize_preference(value: Option<String>) -> Option<String> {
    value.and_then(|raw| {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

#[derive(Debug, Error)]
enum CliError {
    #[error("配置文件错误: {0}")]
    Config(#[from] ConfigError),
    #[error("缺少可用的 LLM 配置，请先在配置文件中添加 llm_profiles。")]
    MissingLlmProfile,
    #[error("缺少可用的 Embedding 配置，请先在配置文件中添加 embedding_profiles。")]
    MissingEmbeddingProfile,
    #[error("未找到名为 `{0}` 的接口配置")]
    UnknownInterface(String),
    #[error("读取文件 `{path}` 失败: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("序列化输出失败: {0}")]
    Json(#[from] serde_json::Error),
    #[error("适配器初始化失败: {0}")]
    Adapter(#[from] AdapterError),
    #[error("LLM 调用失败: {0}")]
    Model(#[from] LanguageModelError),
    #[error("Embedding 调用失败: {0}")]
    Embedding(#[from] EmbeddingModelError),
    #[error("提示词加载失败: {0}")]
    Prompt(#[from] PromptError),
    #[error("{0}")]
    Project(#[from] ProjectError),
    #[error("架构生成失败: {0}")]
    Architecture(#[from] ArchitectureError),
    #[error("章节目录生成失败: {0}")]
    Blueprint(#[from] BlueprintError),
    #[error("{0}")]
    Chapter(#[from] ChapterError),
    #[error("{0}")]
    RunningDocument(#[from] RunningDocumentError),
    #[error("知识库操作失败: {0}")]
    Knowledge(#[from] KnowledgeError),
    #[error("{0}")]
    TestFailed(String),
}

impl CliError {
    fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Project(err) => Some(err.kind()),
            Self::Architecture(err) => Some(err.kind()),
            Self::Blueprint(err) => Some(err.kind()),
            Self::Chapter(err) => Some(err.kind()),
            Self::RunningDocument(err) => Some(err.kind()),
            Self::Knowledge(err) => Some(err.kind()),
            Self::Model(_) | Self::Embedding(_) | Self::TestFailed(_) => {
                Some(ErrorKind::GenerationFailure)
            }
            _ => None,
        }
    }

    fn exit_code(&self) -> i32 {
        match self.kind() {
            Some(ErrorKind::PrerequisiteMissing) => 3,
            Some(ErrorKind::GenerationFailure) => 4,
            Some(ErrorKind::StorageFailure) => 5,
            None => 1,
        }
    }
}

#[derive(Parser)]
#[command(name = "storyforge", version, about = "分阶段生成长篇小说的命令行工具")]
struct Cli {
    /// 指定配置文件路径
    #[arg(long, global = true, default_value = "config.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// 项目管理
    #[command(subcommand)]
    Project(ProjectCommand),
    /// 小说架构
    #[command(subcommand)]
    Architecture(ArchitectureCommand),
    /// 章节目录
    #[command(subcommand)]
    Blueprint(BlueprintCommand),
    /// 章节草稿与定稿
    #[command(subcommand)]
    Chapter(ChapterCommand),
    /// 角色状态文档
    #[command(subcommand)]
    State(RunningCommand),
    /// 全局摘要文档
    #[command(subcommand)]
    Summary(RunningCommand),
    /// 项目知识库
    #[command(subcommand)]
    Knowledge(KnowledgeCommand),
    /// 接口配置检查
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Subcommand)]
enum ProjectCommand {
    /// 新建小说项目，输出项目 ID
    Create(ProjectCreateArgs),
    /// 按创建时间倒序列出项目
    List,
    /// 显示项目信息（JSON）
    Show(ProjectArgs),
    /// 删除项目及其知识库
    Delete(ProjectArgs),
}

#[derive(Subcommand)]
enum ArchitectureCommand {
    /// 生成或续跑小说架构
    Generate(GenerateArgs),
    /// 显示架构；尚未完成时显示各阶段进度
    Show(ProjectArgs),
}

#[derive(Subcommand)]
enum BlueprintCommand {
    /// 生成章节目录
    Generate(GenerateArgs),
    /// 显示章节目录
    Show(ProjectArgs),
}

#[derive(Subcommand)]
enum ChapterCommand {
    /// 生成章节草稿
    Draft(ChapterDraftArgs),
    /// 定稿章节，并同步摘要、角色状态及知识库
    Finalize(ChapterGenerateArgs),
    /// 显示章节大纲与正文
    Show(ChapterArgs),
    /// 列出全部章节
    List(ProjectArgs),
    /// 用文件内容覆盖章节正文
    Save(ChapterSaveArgs),
}

#[derive(Subcommand)]
enum RunningCommand {
    /// 依据小说架构重新生成
    Generate(GenerateArgs),
    /// 显示当前内容
    Show(ProjectArgs),
}

#[derive(Subcommand)]
enum KnowledgeCommand {
    /// 导入本地文本文件
    Import(KnowledgeImportArgs),
    /// 检索知识库
    Search(KnowledgeSearchArgs),
    /// 清空知识库
    Clear(KnowledgeClearArgs),
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// 测试 LLM 接口配置
    TestLlm(TestInterfaceArgs),
    /// 测试 Embedding 接口配置
    TestEmbedding(TestInterfaceArgs),
}

#[derive(Args)]
struct InterfaceArgs {
    /// LLM 接口名称，默认为最近使用的接口
    #[arg(long)]
    llm_interface: Option<String>,
    /// Embedding 接口名称，默认为最近使用的接口
    #[arg(long)]
    embedding_interface: Option<String>,
}

#[derive(Args)]
struct ProjectArgs {
    /// 项目 ID
    project: String,
}

#[derive(Args)]
struct ProjectCreateArgs {
    #[arg(long)]
    title: String,
    #[arg(long)]
    genre: String,
    /// 故事主题
    #[arg(long)]
    topic: String,
    /// 计划章节数
    #[arg(long, value_name = "N")]
    chapters: u32,
    /// 每章目标字数
    #[arg(long, value_name = "N", default_value_t = 3000)]
    words: u32,
}

#[derive(Args)]
struct GenerateArgs {
    /// 项目 ID
    project: String,
    #[command(flatten)]
    llm: InterfaceArgs,
    /// 向模型追加的补充指导
    #[arg(long, value_name = "TEXT")]
    guidance: Option<String>,
    /// 单次调用的尝试次数上限，默认 3
    #[arg(long, value_name = "N")]
    max_retries: Option<usize>,
}

#[derive(Args)]
struct ChapterArgs {
    /// 项目 ID
    project: String,
    /// 章节编号，从 1 开始
    #[arg(long, short = 'n', value_name = "N")]
    number: u32,
}

#[derive(Args)]
struct ChapterGenerateArgs {
    /// 项目 ID
    project: String,
    /// 章节编号，从 1 开始
    #[arg(long, short = 'n', value_name = "N")]
    number: u32,
    #[command(flatten)]
    llm: InterfaceArgs,
}

#[derive(Args)]
struct ChapterDraftArgs {
    /// 项目 ID
    project: String,
    /// 章节编号，从 1 开始
    #[arg(long, short = 'n', value_name = "N")]
    number: u32,
    #[command(flatten)]
    llm: InterfaceArgs,
    /// 本章的额外剧情指导
    #[arg(long, value_name = "TEXT")]
    guidance: Option<String>,
    /// 出场角色
    #[arg(long, value_name = "TEXT")]
    characters: Option<String>,
    /// 关键道具
    #[arg(long, value_name = "TEXT")]
    items: Option<String>,
    /// 场景地点
    #[arg(long, value_name = "TEXT")]
    scene: Option<String>,
    /// 时间限制
    #[arg(long, value_name = "TEXT")]
    time: Option<String>,
}

#[derive(Args)]
struct ChapterSaveArgs {
    /// 项目 ID
    project: String,
    #[arg(long, short = 'n', value_name = "N")]
    number: u32,
    /// 新的章节正文文件
    #[arg(long, value_name = "FILE")]
    file: PathBuf,
}

#[derive(Args)]
struct KnowledgeImportArgs {
    /// 项目 ID
    project: String,
    /// 待导入的文本文件
    #[arg(long, value_name = "FILE")]
    file: PathBuf,
    #[arg(long)]
    embedding_interface: Option<String>,
}

#[derive(Args)]
struct KnowledgeSearchArgs {
    /// 项目 ID
    project: String,
    #[arg(long, value_name = "TEXT")]
    query: String,
    #[arg(long)]
    embedding_interface: Option<String>,
}

#[derive(Args)]
struct KnowledgeClearArgs {
    /// 项目 ID
    project: String,
    #[arg(long)]
    embedding_interface: Option<String>,
}

#[derive(Args)]
struct TestInterfaceArgs {
    /// 接口名称，默认为最近使用的接口
    #[arg(long)]
    interface: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use storyforge_core::{DocumentMetadata, DocumentType};
    use tempfile::tempdir;

    struct LengthEmbedding;

    impl EmbeddingModel for LengthEmbedding {
        fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingModelError> {
            texts.iter().map(|text| self.embed_query(text)).collect()
        }

        fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbeddingModelError> {
            Ok(vec![text.chars().count() as f32, 1.0])
        }
    }

    /// A workspace whose only embedding profile cannot be built.
    fn broken_embedding_workspace(root: &Path) -> Workspace {
        let config_path = root.join("config.json");
        let config = serde_json::json!({
            "embedding_profiles": {
                "broken": { "interface_format": "carrier-pigeon", "model_name": "" }
            },
            "storage": {
                "projects_dir": root.join("novels"),
                "vector_store_dir": root.join("vectorstore"),
            }
        });
        fs::write(&config_path, config.to_string()).unwrap();
        Workspace::open(&config_path).unwrap()
    }

    #[test]
    fn command_tree_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn draft_hints_are_parsed() {
        let cli = Cli::try_parse_from([
            "storyforge",
            "chapter",
            "draft",
            "p-1",
            "-n",
            "3",
            "--scene",
            "旧港",
            "--llm-interface",
            "deepseek",
        ])
        .unwrap();
        match cli.command {
            Command::Chapter(ChapterCommand::Draft(args)) => {
                assert_eq!(args.project, "p-1");
                assert_eq!(args.number, 3);
                assert_eq!(args.scene.as_deref(), Some("旧港"));
                assert_eq!(args.llm.llm_interface.as_deref(), Some("deepseek"));
                assert_eq!(args.guidance, None);
            }
            _ => panic!("parsed into the wrong command"),
        }
    }

    #[test]
    fn blank_preferences_are_ignored() {
        assert_eq!(normalize_preference(Some("  ".into())), None);
        assert_eq!(
            normalize_preference(Some(" openai ".into())).as_deref(),
            Some("openai")
        );
    }

    #[test]
    fn error_kinds_map_to_distinct_exit_codes() {
        assert_eq!(
            CliError::Project(ProjectError::NotFound("p".into())).exit_code(),
            3
        );
        assert_eq!(CliError::TestFailed("x".into()).exit_code(), 4);
        assert_eq!(CliError::MissingLlmProfile.exit_code(), 1);
    }

    #[test]
    fn project_commands_work_without_a_usable_embedding_profile() {
        let temp = tempdir().unwrap();
        let workspace = broken_embedding_workspace(temp.path());
        assert!(workspace.knowledge(None).is_err());

        handle_project(
            &workspace,
            ProjectCommand::Create(ProjectCreateArgs {
                title: "雨夜旅店".into(),
                genre: "悬疑".into(),
                topic: "铜钥匙".into(),
                chapters: 3,
                words: 2000,
            }),
        )
        .unwrap();
        handle_project(&workspace, ProjectCommand::List).unwrap();

        let projects = ProjectService::new(
            &workspace.store,
            &DisabledKnowledgeBase,
            &workspace.sink,
        )
        .list()
        .unwrap();
        let id = projects[0].id.clone();
        handle_project(&workspace, ProjectCommand::Show(ProjectArgs { project: id.clone() }))
            .unwrap();

        let sink: SharedLogSink = Arc::new(workspace.sink.clone());
        let index = KnowledgeIndex::new(
            temp.path().join("vectorstore"),
            Arc::new(LengthEmbedding),
            sink,
        );
        index
            .add(
                &id,
                &["秘密设定".to_string()],
                &[DocumentMetadata::new(DocumentType::Knowledge, id.clone())],
            )
            .unwrap();
        assert_eq!(index.search(&id, "秘密设定").len(), 1);

        handle_project(&workspace, ProjectCommand::Delete(ProjectArgs { project: id.clone() }))
            .unwrap();
        assert!(!index.exists(&id));
        assert!(index.search(&id, "秘密设定").is_empty());
    }
}
