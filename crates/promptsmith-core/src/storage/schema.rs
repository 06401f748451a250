pub const DDL: &str = r#"
CREATE TABLE IF NOT EXISTS runs (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  task_json TEXT NOT NULL,
  config_json TEXT,
  started_at TEXT NOT NULL,
  completed_at TEXT,
  status TEXT NOT NULL CHECK (status IN ('running', 'completed', 'failed')),
  champion_prompt_id INTEGER,
  total_evaluations INTEGER,
  error TEXT
);

CREATE TABLE IF NOT EXISTS prompts (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  run_id INTEGER NOT NULL REFERENCES runs(id),
  text TEXT NOT NULL,
  stage TEXT NOT NULL CHECK (stage IN ('initial', 'quick_filter', 'rigorous', 'refined')),
  strategy TEXT,
  quick_score REAL,
  rigorous_score REAL,
  average_score REAL,
  iteration INTEGER NOT NULL DEFAULT 0 CHECK (iteration >= 0),
  track_id INTEGER,
  parent_prompt_id INTEGER,
  is_baseline INTEGER NOT NULL DEFAULT 0,
  created_at TEXT NOT NULL,
  UNIQUE (id, run_id),
  FOREIGN KEY (parent_prompt_id, run_id) REFERENCES prompts(id, run_id)
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_prompts_one_baseline
  ON prompts(run_id) WHERE is_baseline = 1;
CREATE INDEX IF NOT EXISTS idx_prompts_run_stage ON prompts(run_id, stage);
CREATE INDEX IF NOT EXISTS idx_prompts_run_quick ON prompts(run_id, quick_score);
CREATE INDEX IF NOT EXISTS idx_prompts_run_rigorous ON prompts(run_id, rigorous_score);
CREATE INDEX IF NOT EXISTS idx_prompts_run_track ON prompts(run_id, track_id);
CREATE INDEX IF NOT EXISTS idx_prompts_parent ON prompts(parent_prompt_id);

CREATE TABLE IF NOT EXISTS test_cases (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  run_id INTEGER NOT NULL REFERENCES runs(id),
  input TEXT NOT NULL,
  expected_behavior TEXT NOT NULL,
  category TEXT NOT NULL,
  stage TEXT NOT NULL CHECK (stage IN ('quick', 'rigorous')),
  created_at TEXT NOT NULL,
  UNIQUE (id, run_id)
);

CREATE INDEX IF NOT EXISTS idx_test_cases_run_stage ON test_cases(run_id, stage);

CREATE TABLE IF NOT EXISTS evaluations (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  run_id INTEGER NOT NULL REFERENCES runs(id),
  prompt_id INTEGER NOT NULL,
  test_case_id INTEGER NOT NULL,
  response TEXT NOT NULL,
  functionality INTEGER NOT NULL CHECK (functionality BETWEEN 0 AND 10),
  safety INTEGER NOT NULL CHECK (safety BETWEEN 0 AND 10),
  consistency INTEGER NOT NULL CHECK (consistency BETWEEN 0 AND 10),
  edge_case_handling INTEGER NOT NULL CHECK (edge_case_handling BETWEEN 0 AND 10),
  reasoning TEXT NOT NULL,
  overall REAL NOT NULL,
  created_at TEXT NOT NULL,
  UNIQUE (prompt_id, test_case_id),
  FOREIGN KEY (prompt_id, run_id) REFERENCES prompts(id, run_id),
  FOREIGN KEY (test_case_id, run_id) REFERENCES test_cases(id, run_id)
);

CREATE INDEX IF NOT EXISTS idx_evaluations_run_prompt ON evaluations(run_id, prompt_id);

CREATE TABLE IF NOT EXISTS stage_results (
  run_id INTEGER NOT NULL REFERENCES runs(id),
  stage_name TEXT NOT NULL,
  status TEXT NOT NULL CHECK (status IN ('running', 'completed', 'failed')),
  error TEXT,
  updated_at TEXT NOT NULL,
  PRIMARY KEY (run_id, stage_name)
);

CREATE TABLE IF NOT EXISTS weakness_analyses (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  run_id INTEGER NOT NULL REFERENCES runs(id),
  prompt_id INTEGER NOT NULL,
  track_id INTEGER NOT NULL,
  iteration INTEGER NOT NULL,
  description TEXT NOT NULL,
  failed_test_ids_json TEXT NOT NULL,
  failed_test_descriptions_json TEXT NOT NULL,
  created_at TEXT NOT NULL,
  UNIQUE (run_id, track_id, iteration),
  FOREIGN KEY (prompt_id, run_id) REFERENCES prompts(id, run_id)
);

CREATE TABLE IF NOT EXISTS refinement_tracks (
  run_id INTEGER NOT NULL REFERENCES runs(id),
  track_id INTEGER NOT NULL,
  seed_prompt_id INTEGER NOT NULL,
  status TEXT NOT NULL CHECK (status IN ('running', 'converged', 'failed')),
  reason TEXT,
  error TEXT,
  updated_at TEXT NOT NULL,
  PRIMARY KEY (run_id, track_id),
  FOREIGN KEY (seed_prompt_id, run_id) REFERENCES prompts(id, run_id)
);
"#;
